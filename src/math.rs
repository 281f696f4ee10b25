use statrs::function::gamma::ln_gamma;

/// `x * ln(y)` with the convention `0 * ln(0) = 0`.
#[inline]
pub(crate) fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0. {
        0.
    } else {
        x * y.ln()
    }
}

#[inline]
pub(crate) fn ln_factorial(n: f64) -> f64 {
    ln_gamma(n + 1.)
}

/// Log mass of a multinomial draw of `n` trials where `counts[i]` fell in a
/// category of probability `probs[i]` and the remainder fell in the residual
/// category of probability `rest`.
///
/// Returns negative infinity for counts that exceed `n` or land on a
/// category of zero probability.
pub(crate) fn multinomial_log_pmf(n: f64, counts: &[f64], probs: &[f64], rest: f64) -> f64 {
    assert!(counts.len() == probs.len());

    let total: f64 = counts.iter().sum();
    let remainder = n - total;
    if remainder < 0. {
        return f64::NEG_INFINITY;
    }

    let mut logp = ln_factorial(n) - ln_factorial(remainder);
    for (&k, &p) in counts.iter().zip(probs) {
        logp += xlogy(k, p) - ln_factorial(k);
    }
    logp + xlogy(remainder, rest)
}
