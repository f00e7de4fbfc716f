//! Small shared helpers: the deterministic PRNG used for opening shuffles and
//! sample selection, the monotonic millisecond clock all deadlines are
//! expressed in, and the escaped tokenizer for engine command strings.

use std::sync::OnceLock;
use std::time::Instant;

/// SplitMix64 step. `state` advances on every call, so a `&mut u64` doubles as
/// a tiny self-contained generator.
pub fn prng(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut rnd = *state;
    rnd = (rnd ^ (rnd >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    rnd = (rnd ^ (rnd >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    rnd ^ (rnd >> 31)
}

/// Uniform draw in `[0, 1)` from the top 53 bits.
pub fn prngf(state: &mut u64) -> f64 {
    (prng(state) >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Milliseconds on the monotonic clock, measured from first use.
pub fn monotonic_msec() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as i64
}

/// Split a command string into tokens, honoring backslash escapes and double
/// quotes so executable paths and arguments may contain spaces:
/// `"./my engine" --threads 2` and `./my\ engine --threads 2` both yield
/// `["./my engine", "--threads", "2"]`.
pub fn tokenize_command(cmd: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut chars = cmd.chars().peekable();
    let mut in_quotes = false;
    let mut started = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                started = true;
                if let Some(next) = chars.next() {
                    token.push(next);
                }
            }
            '"' => {
                started = true;
                in_quotes = !in_quotes;
            }
            ' ' if !in_quotes => {
                if started && !token.is_empty() {
                    tokens.push(std::mem::take(&mut token));
                }
                started = false;
            }
            _ => {
                started = true;
                token.push(c);
            }
        }
    }
    if started && !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

/// Split `executable` into `(cwd, run)`. A qualified path is executed from its
/// own directory (`../engines/foo` becomes `run = "./foo"` in
/// `cwd = "../engines"`); an unqualified name is searched in `PATH` from the
/// current directory.
pub fn split_cwd_run(executable: &str) -> (String, String) {
    match executable.rfind('/') {
        Some(slash) => {
            let cwd = if slash == 0 { "/" } else { &executable[..slash] };
            (cwd.to_string(), format!("./{}", &executable[slash + 1..]))
        }
        None => ("./".to_string(), executable.to_string()),
    }
}
