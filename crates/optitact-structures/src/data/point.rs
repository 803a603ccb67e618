// Small vector math used by the force resultants.

use std::ops::AddAssign;

/// A 3-vector of f64 components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, other: Vec3) {
        self.x += other.x;
        self.y += other.y;
        self.z += other.z;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_product_follows_the_right_hand_rule() {
        let a = Vec3::new(1.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(a.cross(&b), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(b.cross(&a), Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn accumulation_sums_componentwise() {
        let mut total = Vec3::default();
        total += Vec3::new(1.0, 2.0, 3.0);
        total += Vec3::new(-1.0, 0.5, 1.0);
        assert_eq!(total.to_array(), [0.0, 2.5, 4.0]);
    }
}
