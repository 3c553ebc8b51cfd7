use image::{imageops, ImageBuffer, RgbImage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pipeline::record::Record;

// ---------------------------------------------------------------------------
// Descriptor (wire format)
// ---------------------------------------------------------------------------

/// JSON form of one pipeline step, e.g.
///
/// ```json
/// { "name": "crop-vertical", "args": [60, -1] }
/// ```
///
/// Older steps files spell the name key `"F"`; both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    #[serde(alias = "F")]
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> OperationDescriptor {
        OperationDescriptor { name: name.into(), args }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The fixed vocabulary of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CropVertical,
    Rotate90,
    AngleOffset,
    RadiansToDegrees,
    FlipIfNonzeroAngle,
}

/// Name → operation table. Canonical names first, then the camelCase names
/// used by older steps files.
const REGISTRY: &[(&str, OperationKind)] = &[
    ("crop-vertical", OperationKind::CropVertical),
    ("rotate-90", OperationKind::Rotate90),
    ("angle-offset", OperationKind::AngleOffset),
    ("radians-to-degrees", OperationKind::RadiansToDegrees),
    ("flip-if-nonzero-angle", OperationKind::FlipIfNonzeroAngle),
    ("cropVertical", OperationKind::CropVertical),
    ("rot90", OperationKind::Rotate90),
    ("radOffset", OperationKind::AngleOffset),
    ("rad2deg", OperationKind::RadiansToDegrees),
    ("flipNonZero", OperationKind::FlipIfNonzeroAngle),
];

/// Looks up an operation by name.
pub fn resolve(name: &str) -> Result<OperationKind> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| Error::UnknownOperation { name: name.to_owned() })
}

impl OperationKind {
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::CropVertical => "crop-vertical",
            OperationKind::Rotate90 => "rotate-90",
            OperationKind::AngleOffset => "angle-offset",
            OperationKind::RadiansToDegrees => "radians-to-degrees",
            OperationKind::FlipIfNonzeroAngle => "flip-if-nonzero-angle",
        }
    }

    fn arity(self) -> usize {
        match self {
            OperationKind::CropVertical => 2,
            OperationKind::Rotate90 | OperationKind::AngleOffset => 1,
            OperationKind::RadiansToDegrees | OperationKind::FlipIfNonzeroAngle => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDirection {
    Clockwise,
    /// Accepted by the registry but not implemented: applying it leaves the
    /// image unchanged.
    Anticlockwise,
}

/// A fully validated operation with its arguments bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Keeps rows `start..end`, or `start..` when `end` is `None`.
    CropVertical { start: u32, end: Option<u32> },
    Rotate90(RotationDirection),
    AngleOffset(f64),
    RadiansToDegrees,
    FlipIfNonzeroAngle,
}

impl Operation {
    /// Builds a vertical crop from the raw `(start, end)` pair: a positive
    /// `end` is an exclusive bound, a negative one means "to the bottom", and
    /// zero is rejected.
    pub fn crop_vertical(start: i64, end: i64) -> Result<Operation> {
        const OP: &str = "crop-vertical";
        let start = u32::try_from(start).map_err(|_| Error::InvalidArgument {
            op: OP,
            reason: format!("start must be a non-negative row index, got {}", start),
        })?;
        let end = match end {
            0 => {
                return Err(Error::InvalidArgument {
                    op: OP,
                    reason: "end must be non-zero (negative keeps rows to the bottom)".into(),
                })
            }
            e if e < 0 => None,
            e => Some(u32::try_from(e).map_err(|_| Error::InvalidArgument {
                op: OP,
                reason: format!("end {} is out of range", e),
            })?),
        };
        if let Some(e) = end {
            if e <= start {
                return Err(Error::InvalidArgument {
                    op: OP,
                    reason: format!("end {} must be greater than start {}", e, start),
                });
            }
        }
        Ok(Operation::CropVertical { start, end })
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CropVertical { .. } => OperationKind::CropVertical,
            Operation::Rotate90(_) => OperationKind::Rotate90,
            Operation::AngleOffset(_) => OperationKind::AngleOffset,
            Operation::RadiansToDegrees => OperationKind::RadiansToDegrees,
            Operation::FlipIfNonzeroAngle => OperationKind::FlipIfNonzeroAngle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Resolves a descriptor's name and binds its positional arguments.
    pub fn from_descriptor(descriptor: &OperationDescriptor) -> Result<Operation> {
        let kind = resolve(&descriptor.name)?;
        let op = kind.name();
        let args = &descriptor.args;
        if args.len() != kind.arity() {
            return Err(Error::InvalidArgument {
                op,
                reason: format!("expected {} argument(s), got {}", kind.arity(), args.len()),
            });
        }

        match kind {
            OperationKind::CropVertical => {
                Operation::crop_vertical(int_arg(op, args, 0)?, int_arg(op, args, 1)?)
            }
            OperationKind::Rotate90 => match str_arg(op, args, 0)? {
                "clockwise" => Ok(Operation::Rotate90(RotationDirection::Clockwise)),
                "anticlockwise" => Ok(Operation::Rotate90(RotationDirection::Anticlockwise)),
                other => Err(Error::InvalidArgument {
                    op,
                    reason: format!(
                        "direction must be 'clockwise' or 'anticlockwise', got '{}'",
                        other
                    ),
                }),
            },
            OperationKind::AngleOffset => Ok(Operation::AngleOffset(float_arg(op, args, 0)?)),
            OperationKind::RadiansToDegrees => Ok(Operation::RadiansToDegrees),
            OperationKind::FlipIfNonzeroAngle => Ok(Operation::FlipIfNonzeroAngle),
        }
    }

    /// Applies the operation. Runs even on a record that is already
    /// rejected; none of the operations touch `flag` except to clear it.
    pub fn apply(&self, mut record: Record) -> Result<Record> {
        match self {
            Operation::CropVertical { start, end } => {
                record.image = crop_rows(&record.image, *start, *end);
            }
            Operation::Rotate90(RotationDirection::Clockwise) => {
                record.image = imageops::rotate90(&record.image);
            }
            Operation::Rotate90(RotationDirection::Anticlockwise) => {}
            Operation::AngleOffset(offset) => {
                let angle = record.label_row.angle()?;
                record.label_row.set_angle(angle + offset)?;
            }
            Operation::RadiansToDegrees => {
                let angle = record.label_row.angle()?;
                record.label_row.set_angle(angle.to_degrees())?;
            }
            Operation::FlipIfNonzeroAngle => {
                let angle = record.label_row.angle()?;
                if angle == 0.0 {
                    record.flag = false;
                } else {
                    record.image = imageops::flip_horizontal(&record.image);
                    record.label_row.set_angle(-angle)?;
                }
            }
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Copies rows `start..end` (clamped to the image) into a new buffer.
fn crop_rows(image: &RgbImage, start: u32, end: Option<u32>) -> RgbImage {
    let height = image.height();
    let top = start.min(height);
    let bottom = end.map_or(height, |e| e.min(height)).max(top);
    ImageBuffer::from_fn(image.width(), bottom - top, |x, y| *image.get_pixel(x, top + y))
}

fn int_arg(op: &'static str, args: &[Value], idx: usize) -> Result<i64> {
    let value = &args[idx];
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .ok_or_else(|| Error::InvalidArgument {
            op,
            reason: format!("argument {} must be an integer, got {}", idx, value),
        })
}

fn float_arg(op: &'static str, args: &[Value], idx: usize) -> Result<f64> {
    let value = &args[idx];
    value.as_f64().ok_or_else(|| Error::InvalidArgument {
        op,
        reason: format!("argument {} must be a number, got {}", idx, value),
    })
}

fn str_arg<'a>(op: &'static str, args: &'a [Value], idx: usize) -> Result<&'a str> {
    let value = &args[idx];
    value.as_str().ok_or_else(|| Error::InvalidArgument {
        op,
        reason: format!("argument {} must be a string, got {}", idx, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::record::LabelRow;
    use image::Rgb;
    use serde_json::json;

    /// 4 wide × 6 tall, each pixel encodes its own (x, y).
    fn gradient_record(angle: &str) -> Record {
        let image = ImageBuffer::from_fn(4, 6, |x, y| Rgb([x as u8, y as u8, 0]));
        Record::new(image, ["img.png", angle].into_iter().collect::<LabelRow>())
    }

    fn op(name: &str, args: Vec<Value>) -> Result<Operation> {
        Operation::from_descriptor(&OperationDescriptor::new(name, args))
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = op("sharpen", vec![]).unwrap_err();
        assert!(matches!(err, Error::UnknownOperation { ref name } if name == "sharpen"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn legacy_names_resolve_to_the_same_kind() {
        assert_eq!(resolve("rad2deg").unwrap(), resolve("radians-to-degrees").unwrap());
        assert_eq!(resolve("flipNonZero").unwrap(), OperationKind::FlipIfNonzeroAngle);
    }

    #[test]
    fn arity_is_checked_when_resolving() {
        let err = op("angle-offset", vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { op: "angle-offset", .. }));
    }

    #[test]
    fn crop_with_positive_end_keeps_end_minus_start_rows() {
        let crop = op("crop-vertical", vec![json!(1), json!(4)]).unwrap();
        let out = crop.apply(gradient_record("0.1")).unwrap();
        assert_eq!(out.image.height(), 3);
        assert_eq!(out.image.width(), 4);
        assert_eq!(out.image.get_pixel(2, 0), &Rgb([2, 1, 0]));
    }

    #[test]
    fn crop_with_negative_end_keeps_rows_to_the_bottom() {
        let crop = op("crop-vertical", vec![json!(2), json!(-1)]).unwrap();
        let out = crop.apply(gradient_record("0.1")).unwrap();
        assert_eq!(out.image.height(), 6 - 2);
        assert_eq!(out.image.get_pixel(0, 3), &Rgb([0, 5, 0]));
    }

    #[test]
    fn crop_with_zero_end_is_a_configuration_error() {
        let err = op("crop-vertical", vec![json!(2), json!(0)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("crop-vertical"));
    }

    #[test]
    fn crop_with_end_not_after_start_is_a_configuration_error() {
        for (start, end) in [(5, 3), (4, 4)] {
            let err = op("crop-vertical", vec![json!(start), json!(end)]).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument { op: "crop-vertical", .. }));
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
        assert!(op("crop-vertical", vec![json!(3), json!(4)]).is_ok());
    }

    #[test]
    fn clockwise_rotation_swaps_dimensions() {
        let rot = op("rotate-90", vec![json!("clockwise")]).unwrap();
        let out = rot.apply(gradient_record("0.1")).unwrap();
        assert_eq!((out.image.width(), out.image.height()), (6, 4));
        // Bottom-left pixel moves to the top-left corner.
        assert_eq!(out.image.get_pixel(0, 0), &Rgb([0, 5, 0]));
    }

    #[test]
    fn anticlockwise_rotation_is_a_known_gap_and_leaves_the_image_alone() {
        let rot = op("rotate-90", vec![json!("anticlockwise")]).unwrap();
        let before = gradient_record("0.1");
        let out = rot.apply(before.clone()).unwrap();
        assert_eq!(out.image, before.image);
    }

    #[test]
    fn angle_offset_adds_to_the_angle() {
        let offset = op("angle-offset", vec![json!(0.25)]).unwrap();
        let out = offset.apply(gradient_record("0.5")).unwrap();
        assert_eq!(out.label_row.angle().unwrap(), 0.75);
    }

    #[test]
    fn radians_to_degrees_compounds_when_applied_twice() {
        let conv = op("radians-to-degrees", vec![]).unwrap();
        let once = conv.apply(gradient_record("0.5")).unwrap();
        let twice = conv.apply(once.clone()).unwrap();
        let factor = 180.0 / std::f64::consts::PI;
        assert!((once.label_row.angle().unwrap() - 0.5 * factor).abs() < 1e-9);
        assert!((twice.label_row.angle().unwrap() - 0.5 * factor * factor).abs() < 1e-6);
    }

    #[test]
    fn flip_rejects_zero_angle_without_touching_the_sample() {
        let flip = op("flip-if-nonzero-angle", vec![]).unwrap();
        let before = gradient_record("0.0");
        let out = flip.apply(before.clone()).unwrap();
        assert!(!out.flag);
        assert_eq!(out.image, before.image);
        assert_eq!(out.label_row, before.label_row);
    }

    #[test]
    fn flip_twice_restores_the_original() {
        let flip = op("flip-if-nonzero-angle", vec![]).unwrap();
        let before = gradient_record("0.2");

        let once = flip.apply(before.clone()).unwrap();
        assert!(once.flag);
        assert_eq!(once.label_row.angle().unwrap(), -0.2);
        assert_eq!(once.image.get_pixel(0, 0), &Rgb([3, 0, 0]));

        let twice = flip.apply(once).unwrap();
        assert!(twice.flag);
        assert_eq!(twice.label_row.angle().unwrap(), 0.2);
        assert_eq!(twice.image, before.image);
    }

    #[test]
    fn angle_operations_need_an_angle_column() {
        let record = Record::new(RgbImage::new(1, 1), ["x.png"].into_iter().collect());
        let err = Operation::RadiansToDegrees.apply(record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingResource);
    }
}
