//! Two- and three-dimensional coordinates for describing mesh geometry.
use crate::error::ConfigError;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::fmt::{Display, Formatter};

/// A point in two or three dimensions.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum Coordinates {
    D2([f64; 2]),
    D3([f64; 3]),
}

impl Coordinates {
    pub fn new_2d(x: f64, y: f64) -> Self {
        Self::D2([x, y])
    }

    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self::D3([x, y, z])
    }

    pub fn dim(&self) -> usize {
        self.as_slice().len()
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            Self::D2(x) => x,
            Self::D3(x) => x,
        }
    }

    pub fn x(&self) -> f64 {
        self.as_slice()[0]
    }

    pub fn y(&self) -> f64 {
        self.as_slice()[1]
    }

    pub fn z(&self) -> Result<f64, ConfigError> {
        match self {
            Self::D2(_) => Err(ConfigError::MissingZCoordinate),
            Self::D3([_, _, z]) => Ok(*z),
        }
    }

    pub fn set_x(&mut self, value: f64) {
        self.as_mut_slice()[0] = value;
    }

    pub fn set_y(&mut self, value: f64) {
        self.as_mut_slice()[1] = value;
    }

    pub fn set_z(&mut self, value: f64) -> Result<(), ConfigError> {
        match self {
            Self::D2(_) => Err(ConfigError::MissingZCoordinate),
            Self::D3([_, _, z]) => {
                *z = value;
                Ok(())
            }
        }
    }

    /// Returns the point as a planar point of the given scalar type.
    ///
    /// Fails if the point is three-dimensional.
    pub fn to_point2<T: crate::Real>(&self) -> Result<Point2<T>, ConfigError> {
        match self {
            Self::D2([x, y]) => Ok(Point2::new(nalgebra::convert(*x), nalgebra::convert(*y))),
            Self::D3(_) => Err(ConfigError::CornerDimension),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        match self {
            Self::D2(x) => x,
            Self::D3(x) => x,
        }
    }
}

impl TryFrom<&[f64]> for Coordinates {
    type Error = ConfigError;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        match *values {
            [x, y] => Ok(Self::D2([x, y])),
            [x, y, z] => Ok(Self::D3([x, y, z])),
            _ => Err(ConfigError::CoordinateCount(values.len())),
        }
    }
}

impl TryFrom<Vec<f64>> for Coordinates {
    type Error = ConfigError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::try_from(values.as_slice())
    }
}

impl From<[f64; 2]> for Coordinates {
    fn from(x: [f64; 2]) -> Self {
        Self::D2(x)
    }
}

impl From<[f64; 3]> for Coordinates {
    fn from(x: [f64; 3]) -> Self {
        Self::D3(x)
    }
}

impl Display for Coordinates {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::D2([x, y]) => write!(f, "({x}, {y})"),
            Self::D3([x, y, z]) => write!(f, "({x}, {y}, {z})"),
        }
    }
}
