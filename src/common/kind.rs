use crate::common::error::TranslateError;
use tch::Kind;

/// Smallest finite value representable by a floating point `Kind`, used to build additive
/// attention masks in the precision of the attention scores.
pub(crate) fn get_min(kind: Kind) -> Result<f64, TranslateError> {
    Ok(match kind {
        Kind::Half => half::f16::MIN.to_f64(),
        Kind::BFloat16 => half::bf16::MIN.to_f64(),
        Kind::Float => f32::MIN as f64,
        Kind::Double => f64::MIN,
        _ => {
            return Err(TranslateError::ValueError(format!(
                "Type not supported: attempted to get min for {:?}",
                kind
            )));
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn min_values_for_float_kinds() {
        assert_eq!(get_min(Kind::Float).unwrap(), f32::MIN as f64);
        assert_eq!(get_min(Kind::Double).unwrap(), f64::MIN);
        assert_eq!(get_min(Kind::Half).unwrap(), -65504.0);
        assert!(get_min(Kind::Int64).is_err());
    }
}
