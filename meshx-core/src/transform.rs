/// Homogeneous affine matrices for mesh transforms
///
/// Vertices are row vectors `[x, y, z, 1]` multiplied on the right by these
/// matrices, so translations live in the last row.
use nalgebra::Matrix4;

/// Matrix builder for the mesh transform chain
pub struct Transform;

impl Transform {
    /// Rotation about the x axis (degrees)
    #[rustfmt::skip]
    pub fn rotation_x(degrees: f64) -> Matrix4<f64> {
        let (s, c) = degrees.to_radians().sin_cos();
        Matrix4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, c, s, 0.0,
            0.0, -s, c, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Rotation about the y axis (degrees)
    #[rustfmt::skip]
    pub fn rotation_y(degrees: f64) -> Matrix4<f64> {
        let (s, c) = degrees.to_radians().sin_cos();
        Matrix4::new(
            c, 0.0, -s, 0.0,
            0.0, 1.0, 0.0, 0.0,
            s, 0.0, c, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Rotation about the z axis (degrees)
    #[rustfmt::skip]
    pub fn rotation_z(degrees: f64) -> Matrix4<f64> {
        let (s, c) = degrees.to_radians().sin_cos();
        Matrix4::new(
            c, s, 0.0, 0.0,
            -s, c, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Create a translation matrix
    #[rustfmt::skip]
    pub fn translation(x: f64, y: f64, z: f64) -> Matrix4<f64> {
        Matrix4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            x, y, z, 1.0,
        )
    }

    /// Create a scale matrix
    pub fn scale(sx: f64, sy: f64, sz: f64) -> Matrix4<f64> {
        Matrix4::new_nonuniform_scaling(&nalgebra::Vector3::new(sx, sy, sz))
    }
}
