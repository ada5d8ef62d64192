//! Point cloud message types carried by the transports.
//!
//! The layout mirrors `sensor_msgs/PointCloud2`: a header, the cloud
//! dimensions, a list of field descriptors and the packed point buffer.

use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A message type that can travel over a topic.
///
/// The type name is used by the topic bus to reject publishers and
/// subscribers that disagree on what a topic carries.
pub trait Message: Any + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

/// Wall-clock time split into seconds and nanoseconds since epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time {
    pub sec: u32,
    pub nsec: u32,
}

impl Time {
    pub fn new(sec: u32, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_duration(since_epoch)
    }

    /// Convert a duration since epoch. Seconds saturate at `u32::MAX`.
    pub fn from_duration(duration: Duration) -> Self {
        let sec = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
        Self {
            sec,
            nsec: duration.subsec_nanos(),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.sec as u64, self.nsec)
    }
}

/// Standard metadata attached to stamped messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub stamp: Time,
    pub frame_id: String,
}

/// Describes one channel of a point, e.g. `x` as a FLOAT32 at offset 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

impl PointField {
    pub const INT8: u8 = 1;
    pub const UINT8: u8 = 2;
    pub const INT16: u8 = 3;
    pub const UINT16: u8 = 4;
    pub const INT32: u8 = 5;
    pub const UINT32: u8 = 6;
    pub const FLOAT32: u8 = 7;
    pub const FLOAT64: u8 = 8;

    pub fn new(name: impl Into<String>, offset: u32, datatype: u8, count: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            datatype,
            count,
        }
    }

    /// Size in bytes of a single element of `datatype`, or `None` for
    /// unknown datatypes.
    pub fn size_of_datatype(datatype: u8) -> Option<usize> {
        match datatype {
            Self::INT8 | Self::UINT8 => Some(1),
            Self::INT16 | Self::UINT16 => Some(2),
            Self::INT32 | Self::UINT32 | Self::FLOAT32 => Some(4),
            Self::FLOAT64 => Some(8),
            _ => None,
        }
    }
}

/// Reasons a [`PointCloud2`] buffer does not match its declared layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("row_step {row_step} does not equal width {width} * point_step {point_step}")]
    RowStep {
        row_step: u32,
        width: u32,
        point_step: u32,
    },

    #[error("data holds {actual} bytes but row_step * height is {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("field '{name}' has unknown datatype {datatype}")]
    UnknownDatatype { name: String, datatype: u8 },

    #[error("field '{name}' extends past point_step {point_step}")]
    FieldOutOfBounds { name: String, point_step: u32 },
}

/// A possibly organized cloud of N-dimensional points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud2 {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

impl PointCloud2 {
    /// Number of points declared by the cloud dimensions.
    pub fn point_count(&self) -> usize {
        self.height as usize * self.width as usize
    }

    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }

    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Check that the buffer size and field offsets agree with the
    /// declared dimensions.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let expected_row_step = self.width as u64 * self.point_step as u64;
        if self.row_step as u64 != expected_row_step {
            return Err(LayoutError::RowStep {
                row_step: self.row_step,
                width: self.width,
                point_step: self.point_step,
            });
        }

        let expected = self.row_step as usize * self.height as usize;
        if self.data.len() != expected {
            return Err(LayoutError::DataLength {
                expected,
                actual: self.data.len(),
            });
        }

        for field in &self.fields {
            let Some(size) = PointField::size_of_datatype(field.datatype) else {
                return Err(LayoutError::UnknownDatatype {
                    name: field.name.clone(),
                    datatype: field.datatype,
                });
            };
            let end = field.offset as usize + size * field.count.max(1) as usize;
            if end > self.point_step as usize {
                return Err(LayoutError::FieldOutOfBounds {
                    name: field.name.clone(),
                    point_step: self.point_step,
                });
            }
        }

        Ok(())
    }
}

impl Message for PointCloud2 {
    const TYPE_NAME: &'static str = "sensor_msgs/PointCloud2";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz_cloud(points: u32) -> PointCloud2 {
        PointCloud2 {
            header: Header {
                seq: 0,
                stamp: Time::new(10, 0),
                frame_id: "lidar".to_string(),
            },
            height: 1,
            width: points,
            fields: vec![
                PointField::new("x", 0, PointField::FLOAT32, 1),
                PointField::new("y", 4, PointField::FLOAT32, 1),
                PointField::new("z", 8, PointField::FLOAT32, 1),
            ],
            is_bigendian: false,
            point_step: 12,
            row_step: 12 * points,
            data: vec![0; 12 * points as usize],
            is_dense: true,
        }
    }

    #[test]
    fn test_valid_layout() {
        let cloud = xyz_cloud(4);
        assert_eq!(cloud.point_count(), 4);
        assert!(cloud.validate().is_ok());
        assert_eq!(cloud.field("y").map(|f| f.offset), Some(4));
    }

    #[test]
    fn test_data_length_mismatch() {
        let mut cloud = xyz_cloud(4);
        cloud.data.pop();
        assert_eq!(
            cloud.validate(),
            Err(LayoutError::DataLength {
                expected: 48,
                actual: 47
            })
        );
    }

    #[test]
    fn test_field_past_point_step() {
        let mut cloud = xyz_cloud(2);
        cloud.fields.push(PointField::new("intensity", 12, PointField::FLOAT32, 1));
        assert!(matches!(
            cloud.validate(),
            Err(LayoutError::FieldOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_time_conversion() {
        let time = Time::from_duration(Duration::new(1000, 500_000_000));
        assert_eq!(time, Time::new(1000, 500_000_000));
        assert_eq!(time.as_duration(), Duration::new(1000, 500_000_000));

        let saturated = Time::from_duration(Duration::from_secs(u64::MAX));
        assert_eq!(saturated.sec, u32::MAX);
    }
}
