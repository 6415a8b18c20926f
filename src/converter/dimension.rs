//! # 输出尺寸计算
//!
//! 纯函数：输入为尺寸选择与源尺寸，输出唯一的目标宽高。
//!
//! - `original`：原样返回源尺寸
//! - `宽x高`：把源图等比放入目标框，较“宽”的一边贴满目标框，另一边四舍五入

use super::source::SizeSelector;
use super::ConvertError;

/// 以字符串形式的尺寸选择计算输出尺寸。
///
/// # 示例
/// ```rust
/// use image_transcoder::converter::resolve_dimensions;
///
/// assert_eq!(resolve_dimensions("100x100", 400, 300)?, (100, 75));
/// assert_eq!(resolve_dimensions("original", 400, 300)?, (400, 300));
/// # Ok::<(), image_transcoder::converter::ConvertError>(())
/// ```
pub fn resolve_dimensions(
    size_selector: &str,
    source_width: u32,
    source_height: u32,
) -> Result<(u32, u32), ConvertError> {
    let selector: SizeSelector = size_selector.parse()?;
    selector.resolve(source_width, source_height)
}

impl SizeSelector {
    /// 计算该选择在给定源尺寸下的输出尺寸。
    pub fn resolve(&self, source_width: u32, source_height: u32) -> Result<(u32, u32), ConvertError> {
        if source_width == 0 || source_height == 0 {
            return Err(ConvertError::InvalidSourceDimensions {
                width: source_width,
                height: source_height,
            });
        }

        let (target_width, target_height) = match *self {
            SizeSelector::Original => return Ok((source_width, source_height)),
            SizeSelector::Box { width, height } => (width, height),
        };
        if target_width == 0 || target_height == 0 {
            return Err(ConvertError::InvalidSizeSelector(self.to_string()));
        }

        let source_ratio = source_width as f64 / source_height as f64;
        let box_ratio = target_width as f64 / target_height as f64;

        // f64::round 为四舍五入（远离零）；极端宽高比下短边至少保留 1 像素
        if source_ratio > box_ratio {
            let height = (target_width as f64 / source_ratio).round() as u32;
            Ok((target_width, height.max(1)))
        } else {
            let width = (target_height as f64 * source_ratio).round() as u32;
            Ok((width.max(1), target_height))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn landscape_source_fills_box_width() {
        assert_eq!(resolve_dimensions("100x100", 400, 300).unwrap(), (100, 75));
    }

    #[test]
    fn portrait_source_fills_box_height() {
        assert_eq!(resolve_dimensions("100x100", 300, 400).unwrap(), (75, 100));
    }

    #[test]
    fn equal_ratio_uses_box_exactly() {
        assert_eq!(resolve_dimensions("192x108", 1920, 1080).unwrap(), (192, 108));
    }

    #[test]
    fn rounds_half_away_from_zero() {
        // 3x2 放入 5x5：高 = 5 / 1.5 = 3.33 -> 3
        assert_eq!(resolve_dimensions("5x5", 3, 2).unwrap(), (5, 3));
        // 2x1 放入 5x5：高 = 2.5 -> 3
        assert_eq!(resolve_dimensions("5x5", 2, 1).unwrap(), (5, 3));
    }

    #[test]
    fn extreme_ratio_keeps_one_pixel() {
        assert_eq!(resolve_dimensions("100x100", 10_000, 1).unwrap(), (100, 1));
    }

    #[test]
    fn zero_source_dimensions_are_rejected() {
        assert!(matches!(
            resolve_dimensions("100x100", 0, 10),
            Err(ConvertError::InvalidSourceDimensions { .. })
        ));
        assert!(matches!(
            resolve_dimensions("original", 10, 0),
            Err(ConvertError::InvalidSourceDimensions { .. })
        ));
    }

    #[test]
    fn malformed_selector_is_rejected() {
        assert!(matches!(
            resolve_dimensions("big", 10, 10),
            Err(ConvertError::InvalidSizeSelector(_))
        ));
    }

    proptest! {
        #[test]
        fn original_is_identity(w in 1u32..20_000, h in 1u32..20_000) {
            prop_assert_eq!(SizeSelector::Original.resolve(w, h).unwrap(), (w, h));
        }

        #[test]
        fn box_output_fits_and_keeps_ratio(
            w in 1u32..10_000,
            h in 1u32..10_000,
            bw in 1u32..4_000,
            bh in 1u32..4_000,
        ) {
            let selector = SizeSelector::Box { width: bw, height: bh };
            let (ow, oh) = selector.resolve(w, h).unwrap();

            prop_assert!(ow >= 1 && oh >= 1);
            prop_assert!(ow <= bw && oh <= bh);

            let ratio = w as f64 / h as f64;
            if ratio > bw as f64 / bh as f64 {
                prop_assert_eq!(ow, bw);
                prop_assert!((oh as f64 - bw as f64 / ratio).abs() <= 1.0);
            } else {
                prop_assert_eq!(oh, bh);
                prop_assert!((ow as f64 - bh as f64 * ratio).abs() <= 1.0);
            }
        }
    }
}
