use image::RgbImage;

use crate::error::{Error, Result};

/// Column holding the image file name in every index row.
pub const FILENAME_FIELD: usize = 0;
/// Column holding the steering angle in every index row.
pub const ANGLE_FIELD: usize = 1;

/// One row of a dataset index, kept as the raw text cells so that label
/// columns this crate does not understand survive a transform untouched.
///
/// Fields are only interpreted when a reader asks for them: a row without an
/// angle column is fine until an angle operation runs on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRow {
    fields: Vec<String>,
}

impl LabelRow {
    pub fn new(fields: Vec<String>) -> LabelRow {
        LabelRow { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn filename(&self) -> Result<&str> {
        match self.fields.get(FILENAME_FIELD).map(|f| f.trim()) {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(Error::MissingField {
                field: FILENAME_FIELD,
                reason: "image filename is empty or absent".into(),
            }),
        }
    }

    pub fn set_filename(&mut self, name: impl Into<String>) {
        let name = name.into();
        match self.fields.get_mut(FILENAME_FIELD) {
            Some(slot) => *slot = name,
            None => self.fields.push(name),
        }
    }

    /// Parses the steering angle column.
    pub fn angle(&self) -> Result<f64> {
        let cell = self.fields.get(ANGLE_FIELD).ok_or_else(|| Error::MissingField {
            field: ANGLE_FIELD,
            reason: "row has no angle column".into(),
        })?;
        cell.trim().parse::<f64>().map_err(|_| Error::MissingField {
            field: ANGLE_FIELD,
            reason: format!("'{}' is not a valid angle", cell),
        })
    }

    pub fn set_angle(&mut self, angle: f64) -> Result<()> {
        match self.fields.get_mut(ANGLE_FIELD) {
            Some(slot) => {
                *slot = angle.to_string();
                Ok(())
            }
            None => Err(Error::MissingField {
                field: ANGLE_FIELD,
                reason: "row has no angle column".into(),
            }),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for LabelRow {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        LabelRow::new(iter.into_iter().map(Into::into).collect())
    }
}

/// The value flowing through a pipeline: one decoded image, its index row,
/// and the keep/drop decision accumulated so far.
///
/// Operations take a `Record` by value and hand back a new one, so no stage
/// ever observes another stage's half-applied state.
#[derive(Debug, Clone)]
pub struct Record {
    pub image: RgbImage,
    pub label_row: LabelRow,
    /// `false` once any operation has rejected the sample.
    pub flag: bool,
    /// Output file name to use instead of the row's filename field.
    pub image_name_override: Option<String>,
}

impl Record {
    pub fn new(image: RgbImage, label_row: LabelRow) -> Record {
        Record {
            image,
            label_row,
            flag: true,
            image_name_override: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.flag
    }

    /// Name the image is written under: the override if one is set, else the
    /// row's filename field.
    pub fn output_name(&self) -> Result<&str> {
        match &self.image_name_override {
            Some(name) => Ok(name.as_str()),
            None => self.label_row.filename(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_is_read_lazily() {
        let row: LabelRow = ["only_a_name.png"].into_iter().collect();
        assert_eq!(row.filename().unwrap(), "only_a_name.png");
        assert!(matches!(row.angle(), Err(Error::MissingField { field: 1, .. })));
    }

    #[test]
    fn set_angle_rewrites_the_cell() {
        let mut row: LabelRow = ["a.png", "0.2", "extra"].into_iter().collect();
        row.set_angle(-0.2).unwrap();
        assert_eq!(row.fields(), &["a.png", "-0.2", "extra"]);
    }

    #[test]
    fn override_wins_over_row_filename() {
        let row: LabelRow = ["a.png", "0.0"].into_iter().collect();
        let mut record = Record::new(RgbImage::new(1, 1), row);
        assert_eq!(record.output_name().unwrap(), "a.png");
        record.image_name_override = Some("b.png".into());
        assert_eq!(record.output_name().unwrap(), "b.png");
    }
}
