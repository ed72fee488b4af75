//! The typed row decoded from the converted spreadsheet.

use serde::{Deserialize, Serialize};

/// One class session, decoded from one CSV data row.
///
/// Numeric fields are zero when their cell is empty or their column is
/// missing from the header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    /// Opaque date text; `None` when the cell is empty or the column absent.
    pub date: Option<String>,
    pub time: String,
    pub classroom: String,
    pub instructor: String,
    #[serde(rename = "avgRPM")]
    pub avg_rpm: i64,
    #[serde(rename = "maxRPM")]
    pub max_rpm: i64,
    pub avg_torque: i64,
    pub max_torque: i64,
    pub avg_speed: i64,
    pub class_time_minutes: f64,
    pub total_power: i64,
    pub total_distance: i64,
    pub estimated_calories_low: i64,
    pub estimated_calories_high: i64,
}

/// A decodable column of [`ClassRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Time,
    Classroom,
    Instructor,
    AvgRpm,
    MaxRpm,
    AvgTorque,
    MaxTorque,
    AvgSpeed,
    ClassTime,
    TotalPower,
    TotalDistance,
    CaloriesLow,
    CaloriesHigh,
}

impl Field {
    /// Every field, in the column order of the exported sheet.
    pub const ALL: [Field; 14] = [
        Field::Date,
        Field::Time,
        Field::Classroom,
        Field::Instructor,
        Field::AvgRpm,
        Field::MaxRpm,
        Field::AvgTorque,
        Field::MaxTorque,
        Field::AvgSpeed,
        Field::ClassTime,
        Field::TotalPower,
        Field::TotalDistance,
        Field::CaloriesLow,
        Field::CaloriesHigh,
    ];

    /// The header label the exported sheet uses for this column.
    pub fn label(self) -> &'static str {
        match self {
            Field::Date => "Date",
            Field::Time => "Time",
            Field::Classroom => "Classroom",
            Field::Instructor => "Instructor",
            Field::AvgRpm => "Avg RPM",
            Field::MaxRpm => "Max RPM",
            Field::AvgTorque => "Avg Torq",
            Field::MaxTorque => "Max Torq",
            Field::AvgSpeed => "Avg Speed",
            Field::ClassTime => "Class Time (TODO)",
            Field::TotalPower => "Total Power",
            Field::TotalDistance => "Total Distance",
            Field::CaloriesLow => "Estimated Calories Low",
            Field::CaloriesHigh => "Estimated Calories High",
        }
    }

    /// Alternative spellings accepted in the header row.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::AvgRpm => &["AvgRPM"],
            Field::MaxRpm => &["MaxRPM"],
            Field::AvgTorque => &["AvgTorq", "Avg Torque", "AvgTorque"],
            Field::MaxTorque => &["MaxTorq", "Max Torque", "MaxTorque"],
            Field::AvgSpeed => &["AvgSpeed"],
            Field::ClassTime => &["Class Time", "ClassTime"],
            Field::TotalPower => &["TotalPower"],
            Field::TotalDistance => &["TotalDistance"],
            Field::CaloriesLow => &["EstimatedCaloriesLow"],
            Field::CaloriesHigh => &["EstimatedCaloriesHigh"],
            Field::Date | Field::Time | Field::Classroom | Field::Instructor => &[],
        }
    }

    /// Resolve a header cell to a field. Trimmed, case-insensitive.
    pub fn from_header(header: &str) -> Option<Field> {
        let header = header.trim();
        Field::ALL.into_iter().find(|f| {
            f.label().eq_ignore_ascii_case(header)
                || f.aliases().iter().any(|a| a.eq_ignore_ascii_case(header))
        })
    }

    /// Whether the cell is parsed as a number.
    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            Field::Date | Field::Time | Field::Classroom | Field::Instructor
        )
    }
}

impl ClassRecord {
    /// Store a text cell. Numeric fields are handled by [`ClassRecord::set_number`].
    pub(crate) fn set_text(&mut self, field: Field, value: &str) {
        match field {
            Field::Date => {
                let v = value.trim();
                self.date = (!v.is_empty()).then(|| v.to_string());
            }
            Field::Time => self.time = value.to_string(),
            Field::Classroom => self.classroom = value.to_string(),
            Field::Instructor => self.instructor = value.to_string(),
            _ => {}
        }
    }

    /// Parse and store a numeric cell, returning `false` when `cell` is not
    /// a number. Integer columns accept a fractional value and truncate it.
    pub(crate) fn set_number(&mut self, field: Field, cell: &str) -> bool {
        let cell = cell.trim();
        if field == Field::ClassTime {
            return match cell.parse::<f64>() {
                Ok(v) => {
                    self.class_time_minutes = v;
                    true
                }
                Err(_) => false,
            };
        }
        let int = match cell.parse::<i64>() {
            Ok(v) => v,
            Err(_) => match cell.parse::<f64>() {
                Ok(v) if v.is_finite() => v.trunc() as i64,
                _ => return false,
            },
        };
        match field {
            Field::AvgRpm => self.avg_rpm = int,
            Field::MaxRpm => self.max_rpm = int,
            Field::AvgTorque => self.avg_torque = int,
            Field::MaxTorque => self.max_torque = int,
            Field::AvgSpeed => self.avg_speed = int,
            Field::TotalPower => self.total_power = int,
            Field::TotalDistance => self.total_distance = int,
            Field::CaloriesLow => self.estimated_calories_low = int,
            Field::CaloriesHigh => self.estimated_calories_high = int,
            Field::Date | Field::Time | Field::Classroom | Field::Instructor | Field::ClassTime => {
                return false
            }
        }
        true
    }
}
