use common::Buffer2;

use super::*;

#[test]
fn test_flag_bits_are_distinct() {
    let mut seen = 0u16;
    for flag in MaskFlag::iter() {
        assert_eq!(seen & flag.bit(), 0, "{flag} overlaps");
        seen |= flag.bit();
    }
}

#[test]
fn test_pixel_mask_set_semantics() {
    let mut mask = PixelMask::GOOD;
    assert!(mask.is_good());
    mask.insert(MaskFlag::CosmicRay);
    mask.insert(MaskFlag::CosmicRay);
    mask.insert(MaskFlag::Extract);
    assert!(!mask.is_good());
    assert!(mask.contains(MaskFlag::CosmicRay));
    assert!(!mask.contains(MaskFlag::Saturated));
    assert_eq!(
        mask.flags().collect::<Vec<_>>(),
        vec![MaskFlag::CosmicRay, MaskFlag::Extract]
    );
    assert_eq!(
        PixelMask::from_flags(&[MaskFlag::Extract, MaskFlag::CosmicRay]),
        mask
    );
}

#[test]
fn test_new_flags_invalid_pixels() {
    let image = Buffer2::new(3, 1, vec![1.0, f32::NAN, 2.0]);
    let ivar = Buffer2::new(3, 1, vec![1.0, 1.0, 0.0]);
    let rn2 = Buffer2::new_default(3, 1);
    let frame = ScienceFrame::new(image, ivar, rn2, None).unwrap();
    assert!(frame.is_good(0));
    assert!(frame.mask()[1].contains(MaskFlag::IsNan));
    assert!(frame.mask()[2].contains(MaskFlag::IvarZero));
    assert_eq!(frame.count_flag(MaskFlag::IvarZero), 1);
}

#[test]
fn test_new_keeps_input_mask() {
    let mut mask = Buffer2::new_default(2, 2);
    mask[(1, 1)] = PixelMask::from_flags(&[MaskFlag::Saturated]);
    let frame = ScienceFrame::new(
        Buffer2::new_filled(2, 2, 1.0),
        Buffer2::new_filled(2, 2, 1.0),
        Buffer2::new_default(2, 2),
        Some(mask),
    )
    .unwrap();
    assert!(frame.mask()[(1, 1)].contains(MaskFlag::Saturated));
    assert!(frame.is_good(0));
}

#[test]
fn test_new_rejects_shape_mismatch() {
    let err = ScienceFrame::new(
        Buffer2::new_filled(4, 3, 1.0),
        Buffer2::new_filled(4, 2, 1.0),
        Buffer2::new_default(4, 3),
        None,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            what: "ivar",
            expected: (4, 3),
            actual: (4, 2)
        }
    ));
}

#[test]
fn test_negated_image_leaves_frame_untouched() {
    let frame = ScienceFrame::new(
        Buffer2::new(2, 1, vec![1.5, -2.0]),
        Buffer2::new_filled(2, 1, 1.0),
        Buffer2::new_default(2, 1),
        None,
    )
    .unwrap();
    let neg = frame.negated_image();
    assert_eq!(neg.pixels(), &[-1.5, 2.0]);
    assert_eq!(frame.image().pixels(), &[1.5, -2.0]);
}
