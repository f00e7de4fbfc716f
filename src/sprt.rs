//! Sequential probability ratio test for early tournament termination.
//!
//! Uses the asymptotic log-likelihood-ratio approximation in the trinomial
//! GSPRT model (see <http://hardy.uhasselt.be/Toga/GSPRT_approximation.pdf>).
//! After each game the cumulative win/loss/draw tally is tested against two
//! elo hypotheses; once either is accepted the job queue is stopped.

use anyhow::{bail, Result};

/// The two elo hypotheses and error rates of the test.
#[derive(Debug, Clone, Copy)]
pub struct SprtParams {
    pub elo0: f64,
    pub elo1: f64,
    /// Type I error rate (accepting H1 when H0 holds).
    pub alpha: f64,
    /// Type II error rate (accepting H0 when H1 holds).
    pub beta: f64,
}

impl Default for SprtParams {
    fn default() -> Self {
        SprtParams {
            elo0: 0.0,
            elo1: 0.0,
            alpha: 0.05,
            beta: 0.05,
        }
    }
}

/// Outcome of one test step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SprtStatus {
    AcceptH1,
    AcceptH0,
    Continue,
}

fn elo_to_score(elo: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-elo / 400.0))
}

impl SprtParams {
    /// Parse an `elo0=,elo1=,alpha=,beta=` spec.
    pub fn parse_spec(spec: &str) -> Result<SprtParams> {
        let mut params = SprtParams::default();
        for token in spec.split(',').filter(|t| !t.is_empty()) {
            let Some((key, value)) = token.split_once('=') else {
                bail!("expected key=value in sprt spec, got '{token}'");
            };
            let value: f64 = value.parse()?;
            match key {
                "elo0" => params.elo0 = value,
                "elo1" => params.elo1 = value,
                "alpha" => params.alpha = value,
                "beta" => params.beta = value,
                other => bail!("unknown key '{other}' in sprt spec"),
            }
        }
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0 < self.alpha && self.alpha < 1.0 && 0.0 < self.beta && self.beta < 1.0) {
            bail!("SPRT alpha and beta must be in (0, 1)");
        }
        if self.elo0 >= self.elo1 {
            bail!("SPRT requires elo0 < elo1");
        }
        Ok(())
    }

    /// Decision bounds `(lower, upper)`: accept H0 below, H1 above.
    pub fn bounds(&self) -> (f64, f64) {
        (
            (self.beta / (1.0 - self.alpha)).ln(),
            ((1.0 - self.beta) / self.alpha).ln(),
        )
    }

    /// The generalized LLR for a `[wins, losses, draws]` tally. Zero until at
    /// least two of the three counters are non-zero, so the test cannot fire
    /// off a degenerate sample.
    pub fn llr(&self, wld: [u32; 3]) -> f64 {
        let [wins, losses, draws] = wld;
        let non_zero = [wins, losses, draws].iter().filter(|&&c| c != 0).count();
        if non_zero < 2 {
            return 0.0;
        }
        let n = (wins + losses + draws) as f64;
        let w = wins as f64 / n;
        let l = losses as f64 / n;
        let d = 1.0 - w - l;
        let mean = w + d / 2.0;
        let var = (w + d / 4.0) - mean * mean;
        let s0 = elo_to_score(self.elo0);
        let s1 = elo_to_score(self.elo1);
        (s1 - s0) * (2.0 * mean - s0 - s1) / (2.0 * var / n)
    }

    /// Run one test step and print its status line.
    pub fn check(&self, wld: [u32; 3]) -> SprtStatus {
        let (lower, upper) = self.bounds();
        let llr = self.llr(wld);

        if llr > upper {
            println!("SPRT: LLR = {llr:.3} [{lower:.3},{upper:.3}]. H1 accepted.");
            SprtStatus::AcceptH1
        } else if llr < lower {
            println!("SPRT: LLR = {llr:.3} [{lower:.3},{upper:.3}]. H0 accepted.");
            SprtStatus::AcceptH0
        } else {
            println!("SPRT: LLR = {llr:.3} [{lower:.3},{upper:.3}]");
            SprtStatus::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SprtParams {
        SprtParams {
            elo0: 0.0,
            elo1: 5.0,
            alpha: 0.05,
            beta: 0.05,
        }
    }

    #[test]
    fn degenerate_tallies_continue() {
        let p = params();
        assert_eq!(p.check([0, 0, 0]), SprtStatus::Continue);
        assert_eq!(p.check([10, 0, 0]), SprtStatus::Continue);
        assert_eq!(p.check([0, 7, 0]), SprtStatus::Continue);
        assert_eq!(p.check([0, 0, 100]), SprtStatus::Continue);
    }

    #[test]
    fn bounds_match_error_rates() {
        let (lower, upper) = params().bounds();
        assert!((lower - (-2.944)).abs() < 1e-3);
        assert!((upper - 2.944).abs() < 1e-3);
    }

    #[test]
    fn balanced_sample_stays_inside_bounds() {
        let p = params();
        let llr = p.llr([120, 80, 100]);
        let (lower, upper) = p.bounds();
        assert!(llr > lower && llr < upper, "llr = {llr}");
        assert_eq!(p.check([120, 80, 100]), SprtStatus::Continue);
    }

    #[test]
    fn lopsided_samples_decide() {
        let p = params();
        assert_eq!(p.check([900, 100, 500]), SprtStatus::AcceptH1);
        assert_eq!(p.check([100, 900, 500]), SprtStatus::AcceptH0);
    }

    #[test]
    fn validation() {
        assert!(params().validate().is_ok());
        let mut p = params();
        p.elo1 = -1.0;
        assert!(p.validate().is_err());
        let mut p = params();
        p.alpha = 0.0;
        assert!(p.validate().is_err());
        let mut p = params();
        p.beta = 1.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn spec_parsing() {
        let p = SprtParams::parse_spec("elo0=0,elo1=10,alpha=0.01,beta=0.02").unwrap();
        assert_eq!(p.elo0, 0.0);
        assert_eq!(p.elo1, 10.0);
        assert_eq!(p.alpha, 0.01);
        assert_eq!(p.beta, 0.02);
        assert!(SprtParams::parse_spec("elo0").is_err());
        assert!(SprtParams::parse_spec("zig=1").is_err());
    }
}
