use rust_decimal::Decimal;

/// Annualized moments of aligned return series, with a record of every
/// entry that had to be substituted.
#[derive(Debug, Clone)]
pub struct Moments {
    pub expected_returns: Vec<Decimal>,
    pub covariance: Vec<Vec<Decimal>>,
    pub substitutions: Vec<String>,
}

fn checked_mean(values: &[Decimal]) -> Option<Decimal> {
    let mut sum = Decimal::ZERO;
    for v in values {
        sum = sum.checked_add(*v)?;
    }
    sum.checked_div(Decimal::from(values.len() as i64))
}

/// Sample covariance with an (n - 1) denominator; `None` if any step
/// overflows or the sample is too short.
fn checked_covariance(
    a: &[Decimal],
    b: &[Decimal],
    mean_a: Decimal,
    mean_b: Decimal,
) -> Option<Decimal> {
    let mut sum = Decimal::ZERO;
    for (x, y) in a.iter().zip(b.iter()) {
        let prod = x.checked_sub(mean_a)?.checked_mul(y.checked_sub(mean_b)?)?;
        sum = sum.checked_add(prod)?;
    }
    let denom = a.len().checked_sub(1)?;
    sum.checked_div(Decimal::from(denom as i64))
}

/// Annualize per-period mean returns and sample covariance.
///
/// `columns[i]` holds the per-period returns of `symbols[i]`; a `None` entry
/// is a non-finite return. Any mean or covariance entry that cannot be
/// computed finitely is replaced with zero, and negative variances are
/// clamped to zero.
pub fn annualized_moments(
    symbols: &[String],
    columns: &[Vec<Option<Decimal>>],
    periods_per_year: u32,
) -> Moments {
    let n = columns.len();
    let ppy = Decimal::from(periods_per_year);
    let mut substitutions = Vec::new();

    let finite: Vec<Option<Vec<Decimal>>> = columns
        .iter()
        .map(|col| col.iter().copied().collect::<Option<Vec<Decimal>>>())
        .collect();

    let means: Vec<Option<Decimal>> = finite
        .iter()
        .map(|col| col.as_deref().and_then(checked_mean))
        .collect();

    let expected_returns: Vec<Decimal> = means
        .iter()
        .enumerate()
        .map(|(i, m)| match m.and_then(|m| m.checked_mul(ppy)) {
            Some(v) => v,
            None => {
                substitutions.push(format!("expected return of {} replaced with 0", symbols[i]));
                Decimal::ZERO
            }
        })
        .collect();

    let mut covariance = vec![vec![Decimal::ZERO; n]; n];
    for i in 0..n {
        for j in i..n {
            let entry = match (&finite[i], &finite[j], means[i], means[j]) {
                (Some(a), Some(b), Some(ma), Some(mb)) => {
                    checked_covariance(a, b, ma, mb).and_then(|c| c.checked_mul(ppy))
                }
                _ => None,
            };
            let value = match entry {
                Some(v) if i == j && v < Decimal::ZERO => {
                    substitutions.push(format!(
                        "negative variance of {} clamped to 0",
                        symbols[i]
                    ));
                    Decimal::ZERO
                }
                Some(v) => v,
                None => {
                    substitutions.push(format!(
                        "covariance[{}][{}] ({}, {}) replaced with 0",
                        i, j, symbols[i], symbols[j]
                    ));
                    Decimal::ZERO
                }
            };
            covariance[i][j] = value;
            covariance[j][i] = value;
        }
    }

    Moments {
        expected_returns,
        covariance,
        substitutions,
    }
}
