mod image_frame;
mod point;
pub mod markers;

pub use image_frame::{box_blur, ImageFrame};
pub use point::Vec3;
