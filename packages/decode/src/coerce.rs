//! Column type inference for raw CSV cells.
//!
//! Types are inferred per column over a whole batch, so a column holding
//! both `1` and `1.5` becomes a float column and every cell in it is a
//! [`FieldValue::Float`]. Empty cells never influence the kind.

use opencellid_models::FieldValue;

/// The narrowest type that can hold every non-empty cell of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Only empty cells seen.
    Empty,
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    /// Folds one more raw cell into the kind.
    #[must_use]
    pub fn observe(self, raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || self == Self::Text {
            return self;
        }

        let cell = if raw.parse::<i64>().is_ok() {
            Self::Integer
        } else if raw.parse::<f64>().is_ok() {
            Self::Float
        } else {
            Self::Text
        };

        match (self, cell) {
            (Self::Empty, kind) => kind,
            (Self::Integer, Self::Integer) => Self::Integer,
            (Self::Integer | Self::Float, Self::Integer | Self::Float) => Self::Float,
            _ => Self::Text,
        }
    }
}

/// Infers the kind of a column from its raw cells.
pub fn infer_kind<'a>(cells: impl IntoIterator<Item = &'a str>) -> ColumnKind {
    cells
        .into_iter()
        .fold(ColumnKind::Empty, ColumnKind::observe)
}

/// Converts a raw cell into a value of the column's kind.
#[must_use]
pub fn coerce(raw: &str, kind: ColumnKind) -> FieldValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FieldValue::Null;
    }

    match kind {
        ColumnKind::Empty => FieldValue::Null,
        ColumnKind::Integer => trimmed
            .parse::<i64>()
            .map_or_else(|_| FieldValue::Text(raw.to_owned()), FieldValue::Integer),
        ColumnKind::Float => trimmed
            .parse::<f64>()
            .map_or_else(|_| FieldValue::Text(raw.to_owned()), FieldValue::Float),
        ColumnKind::Text => FieldValue::Text(raw.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_column() {
        assert_eq!(infer_kind(["262", "1", "-4"]), ColumnKind::Integer);
    }

    #[test]
    fn mixed_integer_and_float_is_float() {
        assert_eq!(infer_kind(["1", "1.5"]), ColumnKind::Float);
        assert_eq!(coerce("1", ColumnKind::Float), FieldValue::Float(1.0));
    }

    #[test]
    fn any_text_makes_text_column() {
        assert_eq!(infer_kind(["1", "GSM", "2.5"]), ColumnKind::Text);
        assert_eq!(coerce("1", ColumnKind::Text), FieldValue::from("1"));
    }

    #[test]
    fn empty_cells_do_not_affect_kind() {
        assert_eq!(infer_kind(["", "7", " "]), ColumnKind::Integer);
        assert_eq!(infer_kind(["", ""]), ColumnKind::Empty);
        assert_eq!(coerce("", ColumnKind::Integer), FieldValue::Null);
    }

    #[test]
    fn surrounding_whitespace_is_ignored_for_numbers() {
        assert_eq!(coerce(" 13.25 ", ColumnKind::Float), FieldValue::Float(13.25));
    }
}
