//! Value types shared by the bulb and mesh sides of a light.

mod brightness;
mod color;
mod kelvin;

pub use brightness::Brightness;
pub use color::{Color, ColorXy};
pub use kelvin::{Kelvin, KelvinRange, Mireds};
