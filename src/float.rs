use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FromPrimitive};

/// Marker trait for the element type of a [`Parameter`](crate::Parameter).
///
/// Bundles the numeric traits the vector-arithmetic contract needs.
/// Only primitive float types implement this.
pub trait Float:
    NumFloat + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}
