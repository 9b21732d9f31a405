//! PID controller with back-calculation anti-windup.
//!
//! The integral accumulates before clamping; when the raw output saturates
//! and the anti-windup gain is positive, the integrator is pulled back
//! toward the value that would have produced the clamped output. Zero Ki
//! and Kd simply contribute nothing.

// ─── Settings ───────────────────────────────────────────────────────

/// Construction-time PID parameters.
#[derive(Debug, Clone, Copy)]
pub struct PidSettings {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
    /// Target value the loop drives its measurement toward.
    pub setpoint: f64,
    /// Sample period [s]. Must be > 0.
    pub dt: f64,
    /// Back-calculation anti-windup gain. Must be ≥ 0; 0 disables.
    pub anti_windup_gain: f64,
    /// Output saturation bounds (min, max). Must satisfy min ≤ max.
    pub output_limits: (f64, f64),
}

impl Default for PidSettings {
    fn default() -> Self {
        Self {
            kp: 0.3,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            dt: 1.0,
            anti_windup_gain: 0.0,
            output_limits: (0.0, 0.999),
        }
    }
}

// ─── Error Type ─────────────────────────────────────────────────────

/// PID parameter validation error.
///
/// Rejected at the boundary, before any controller state is mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PidError {
    /// Sample period is zero or negative.
    NonPositiveDt(f64),
    /// Output limits are inverted (min > max).
    InvertedLimits {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Anti-windup gain is negative.
    NegativeAntiWindup(f64),
}

impl std::fmt::Display for PidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveDt(dt) => write!(f, "pid dt must be > 0, got {dt}"),
            Self::InvertedLimits { min, max } => {
                write!(f, "pid output limits inverted: min {min} > max {max}")
            }
            Self::NegativeAntiWindup(aw) => {
                write!(f, "pid anti-windup gain must be >= 0, got {aw}")
            }
        }
    }
}

impl std::error::Error for PidError {}

// ─── Controller ─────────────────────────────────────────────────────

/// One PID loop instance.
///
/// Not internally synchronized: callers that share an instance between the
/// tick thread and the parameter-update path put it behind one lock (the
/// scheduler does exactly that).
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    dt: f64,
    anti_windup_gain: f64,
    out_min: f64,
    out_max: f64,

    integral: f64,
    prev_error: f64,
    last_output: f64,
}

impl PidController {
    /// Create a controller, validating the settings.
    pub fn new(s: PidSettings) -> Result<Self, PidError> {
        if s.dt <= 0.0 {
            return Err(PidError::NonPositiveDt(s.dt));
        }
        let (min, max) = s.output_limits;
        if min > max {
            return Err(PidError::InvertedLimits { min, max });
        }
        if s.anti_windup_gain < 0.0 {
            return Err(PidError::NegativeAntiWindup(s.anti_windup_gain));
        }
        Ok(Self {
            kp: s.kp,
            ki: s.ki,
            kd: s.kd,
            setpoint: s.setpoint,
            dt: s.dt,
            anti_windup_gain: s.anti_windup_gain,
            out_min: min,
            out_max: max,
            integral: 0.0,
            prev_error: 0.0,
            last_output: 0.0,
        })
    }

    /// Compute one cycle of the loop and return the bounded output.
    pub fn compute(&mut self, measurement: f64) -> f64 {
        let error = self.setpoint - measurement;
        let derivative = (error - self.prev_error) / self.dt;
        self.integral += error * self.dt;

        let raw = self.kp * error + self.ki * self.integral + self.kd * derivative;
        let clamped = raw.clamp(self.out_min, self.out_max);

        // Back-calculation: pull the integrator toward the value that would
        // have produced the clamped output. Correction is zero when no
        // clamping occurred.
        if self.anti_windup_gain > 0.0 {
            self.integral += self.anti_windup_gain * (clamped - raw);
        }

        self.prev_error = error;
        self.last_output = clamped;
        clamped
    }

    /// Zero the integral and derivative memory. Gains and setpoint stay.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.last_output = 0.0;
    }

    /// Replace gains, setpoint, and anti-windup gain, then reset.
    ///
    /// Memory accumulated under the old gains is meaningless under the new
    /// ones, so the reset is implicit and unconditional. Validation happens
    /// before any field is mutated.
    pub fn set_params(
        &mut self,
        kp: f64,
        ki: f64,
        kd: f64,
        setpoint: f64,
        anti_windup_gain: f64,
    ) -> Result<(), PidError> {
        if anti_windup_gain < 0.0 {
            return Err(PidError::NegativeAntiWindup(anti_windup_gain));
        }
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self.setpoint = setpoint;
        self.anti_windup_gain = anti_windup_gain;
        self.reset();
        Ok(())
    }

    /// Current setpoint.
    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Output of the most recent `compute` (0 before the first one).
    pub fn last_output(&self) -> f64 {
        self.last_output
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: PidSettings) -> PidController {
        PidController::new(s).unwrap()
    }

    fn wide(kp: f64, ki: f64, kd: f64) -> PidController {
        pid(PidSettings {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            dt: 0.5,
            anti_windup_gain: 0.0,
            output_limits: (-1e9, 1e9),
        })
    }

    #[test]
    fn matches_reference_law_without_clamping() {
        // kp*e + ki*Σe·dt + kd*Δe/dt, replayed by hand over a measurement
        // sequence that never saturates.
        let (kp, ki, kd, dt) = (2.0, 0.4, 0.1, 0.5);
        let mut c = wide(kp, ki, kd);
        let measurements = [1.0, 0.5, -0.25, 2.0, 1.75];

        let mut integral = 0.0;
        let mut prev_error = 0.0;
        for m in measurements {
            let error = 0.0 - m;
            let derivative = (error - prev_error) / dt;
            integral += error * dt;
            let expected = kp * error + ki * integral + kd * derivative;
            prev_error = error;

            let got = c.compute(m);
            assert!((got - expected).abs() < 1e-12, "got {got}, want {expected}");
        }
    }

    #[test]
    fn proportional_scenario_with_clamping() {
        // kp=0.3, setpoint 20, limits (0, 10).
        let mut c = pid(PidSettings {
            kp: 0.3,
            ki: 0.0,
            kd: 0.0,
            setpoint: 20.0,
            dt: 1.0,
            anti_windup_gain: 0.0,
            output_limits: (0.0, 10.0),
        });
        assert!((c.compute(15.0) - 1.5).abs() < 1e-12);
        // Raw output -1.5 clamps to the lower limit.
        assert_eq!(c.compute(25.0), 0.0);
    }

    #[test]
    fn output_always_within_limits() {
        let mut c = pid(PidSettings {
            kp: 10.0,
            ki: 5.0,
            kd: 2.0,
            setpoint: 0.0,
            dt: 1.0,
            anti_windup_gain: 0.0,
            output_limits: (-3.0, 3.0),
        });
        for m in [-1000.0, -1.0, 0.0, 0.5, 1e6, -1e6, 42.0] {
            let out = c.compute(m);
            assert!((-3.0..=3.0).contains(&out), "out of bounds: {out}");
            assert_eq!(out, c.last_output());
        }
    }

    #[test]
    fn reset_erases_history() {
        let mut a = wide(1.0, 2.0, 0.5);
        let mut b = wide(1.0, 2.0, 0.5);
        for m in [3.0, -1.0, 7.5] {
            a.compute(m);
        }
        a.reset();
        // After reset, outputs are independent of anything before it.
        for m in [0.25, -4.0, 1.0] {
            assert_eq!(a.compute(m), b.compute(m));
        }
    }

    #[test]
    fn anti_windup_suppresses_integral_growth() {
        let saturating = PidSettings {
            kp: 1.0,
            ki: 1.0,
            kd: 0.0,
            setpoint: 100.0,
            dt: 1.0,
            anti_windup_gain: 0.0,
            output_limits: (0.0, 1.0),
        };
        let mut plain = pid(saturating);
        let mut protected = pid(PidSettings {
            anti_windup_gain: 0.5,
            ..saturating
        });

        // Output saturated at the max for every tick.
        for _ in 0..50 {
            assert_eq!(plain.compute(0.0), 1.0);
            assert_eq!(protected.compute(0.0), 1.0);
        }
        assert!(
            protected.integral < plain.integral,
            "anti-windup did not suppress windup: {} vs {}",
            protected.integral,
            plain.integral
        );
    }

    #[test]
    fn set_params_resets_memory() {
        let mut c = wide(1.0, 3.0, 0.0);
        for _ in 0..10 {
            c.compute(5.0);
        }
        assert!(c.integral.abs() > 0.0);

        c.set_params(2.0, 0.0, 0.0, 50.0, 0.0).unwrap();
        assert_eq!(c.integral, 0.0);
        assert_eq!(c.prev_error, 0.0);
        assert_eq!(c.last_output, 0.0);
        assert_eq!(c.setpoint(), 50.0);
        // First compute after the swap behaves like a fresh controller.
        let out = c.compute(40.0);
        assert!((out - 20.0).abs() < 1e-12);
    }

    #[test]
    fn set_params_rejects_negative_anti_windup_without_mutating() {
        let mut c = wide(1.0, 1.0, 0.0);
        c.compute(2.0);
        let integral_before = c.integral;
        let err = c.set_params(9.0, 9.0, 9.0, 9.0, -1.0).unwrap_err();
        assert_eq!(err, PidError::NegativeAntiWindup(-1.0));
        assert_eq!(c.integral, integral_before);
        assert_eq!(c.kp, 1.0);
    }

    #[test]
    fn construction_validates() {
        let bad_dt = PidSettings {
            dt: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            PidController::new(bad_dt),
            Err(PidError::NonPositiveDt(_))
        ));

        let bad_limits = PidSettings {
            output_limits: (1.0, -1.0),
            ..Default::default()
        };
        assert!(matches!(
            PidController::new(bad_limits),
            Err(PidError::InvertedLimits { .. })
        ));

        let bad_aw = PidSettings {
            anti_windup_gain: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            PidController::new(bad_aw),
            Err(PidError::NegativeAntiWindup(_))
        ));
    }
}
