//! Wire schema descriptors.
//!
//! A schema is an ordered list of named, typed fields. Frame size, packing
//! order, unpacking order and CSV/terminal column order are all derived from
//! this one list, so adding a field is a data change in one place.

/// Numeric type of one wire field. All kinds are packed big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    F32,
    F64,
    U32,
    I32,
}

impl FieldKind {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::F32 | Self::U32 | Self::I32 => 4,
            Self::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// One named field of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Suffix shown after the value on the terminal line.
    pub unit: &'static str,
    /// Decimal places shown on the terminal line (floats only).
    pub precision: u8,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            unit: "",
            precision: 2,
        }
    }

    pub const fn f32(name: &'static str, unit: &'static str, precision: u8) -> Self {
        Self {
            name,
            kind: FieldKind::F32,
            unit,
            precision,
        }
    }

    pub const fn u32(name: &'static str, unit: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::U32,
            unit,
            precision: 0,
        }
    }
}

/// Ordered field list plus optional frame delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
    /// Byte appended after every encoded frame.
    pub delimiter: Option<u8>,
}

/// Frame terminator used by the delimited schemas.
pub const NEWLINE: u8 = b'\n';

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [Field], delimiter: Option<u8>) -> Self {
        Self {
            name,
            fields,
            delimiter,
        }
    }

    /// Size of the packed fields, excluding any delimiter.
    pub const fn size(&self) -> usize {
        let mut size = 0;
        let mut i = 0;
        while i < self.fields.len() {
            size += self.fields[i].kind.width();
            i += 1;
        }
        size
    }

    /// Size of one frame on the wire, including any delimiter.
    pub const fn frame_size(&self) -> usize {
        match self.delimiter {
            Some(_) => self.size() + 1,
            None => self.size(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    /// Looks up a built-in schema by name.
    pub fn by_name(name: &str) -> Option<&'static Schema> {
        BUILTIN.iter().copied().find(|s| s.name == name)
    }
}

const FINAL_FIELDS: &[Field] = &[
    Field::f32("elapsed_s", "s", 1),
    Field::u32("tip_count", ""),
    Field::f32("rain_mm", "mm", 1),
    Field::f32("rain_rate_mm_h", "mm/h", 2),
    Field::f32("temperature_C", "C", 2),
    Field::f32("pressure_hPa", "hPa", 2),
    Field::f32("altitude_m", "m", 2),
    Field::f32("temperature2_C", "C", 2),
    Field::f32("relative_humidity", "%", 2),
];

/// Canonical rain + environment frame: 9 big-endian fields and `\n`.
pub const FINAL: Schema = Schema::new("final", FINAL_FIELDS, Some(NEWLINE));

const STATION_FIELDS: &[Field] = &[
    Field::f32("time_elapsed_s", "s", 1),
    Field::f32("temperature_bmp280_C", "C", 2),
    Field::f32("pressure_hPa", "hPa", 2),
    Field::f32("altitude_m", "m", 2),
    Field::f32("temperature_sht31d_C", "C", 2),
    Field::f32("relative_humidity", "%", 2),
    Field::f32("wind_gust_m_s_3s", "m/s(3s)", 2),
    Field::f32("wind_sustained_m_s_10min", "m/s(10min)", 2),
    Field::f32("wind_direction_deg_n", "deg", 1),
    Field::f32("rain_mm", "mm", 1),
    Field::f32("rain_rate_mm_h", "mm/h", 2),
    Field::f32("soil_temperature_C", "C", 2),
    Field::u32("soil_moisture_raw", ""),
];

/// Full weather station frame: 12 floats then a u32, no delimiter.
pub const STATION: Schema = Schema::new("station", STATION_FIELDS, None);

const RAIN_FIELDS: &[Field] = &[
    Field::f32("elapsed_s", "s", 1),
    Field::u32("tip_count", ""),
    Field::f32("rain_mm", "mm", 1),
    Field::f32("rain_rate_mm_h", "mm/h", 2),
];

/// Rain gauge only: elapsed time, tips and derived values, with `\n`.
pub const RAIN: Schema = Schema::new("rain", RAIN_FIELDS, Some(NEWLINE));

/// Schemas selectable by name.
pub const BUILTIN: &[&Schema] = &[&FINAL, &STATION, &RAIN];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_sizes() {
        assert_eq!(FINAL.size(), 36);
        assert_eq!(FINAL.frame_size(), 37);
        assert_eq!(STATION.size(), 52);
        assert_eq!(STATION.frame_size(), 52);
        assert_eq!(RAIN.size(), 16);
        assert_eq!(RAIN.frame_size(), 17);
    }

    #[test]
    fn test_custom_schema_size_derived_from_fields() {
        const FIELDS: &[Field] = &[
            Field::new("a", FieldKind::F64),
            Field::new("b", FieldKind::I32),
            Field::new("c", FieldKind::U32),
        ];
        const CUSTOM: Schema = Schema::new("custom", FIELDS, None);
        assert_eq!(CUSTOM.size(), 16);
        assert_eq!(CUSTOM.position("c"), Some(2));
        assert_eq!(CUSTOM.position("missing"), None);
    }

    #[test]
    fn test_by_name_and_unique_field_names() {
        for schema in BUILTIN {
            assert_eq!(Schema::by_name(schema.name), Some(*schema));
            let mut names: Vec<_> = schema.field_names().collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), schema.len(), "duplicate field in {}", schema.name);
        }
        assert!(Schema::by_name("v0").is_none());
    }
}
