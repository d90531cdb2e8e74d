/// Triangle soup storage and analysis
use std::any::Any;

use nalgebra::{Matrix4, Point3, Vector3, Vector4};

use crate::error::{MeshResult, TypeMismatch};
use crate::transform::Transform;

/// One triangle record: facet normal, three vertex positions and the
/// 16-bit attribute word stored by binary STL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub normal: Vector3<f32>,
    pub vertices: [Point3<f32>; 3],
    pub attribute: u16,
}

impl Triangle {
    pub fn new(normal: Vector3<f32>, vertices: [Point3<f32>; 3]) -> Self {
        Self {
            normal,
            vertices,
            attribute: 0,
        }
    }

    pub fn with_attribute(mut self, attribute: u16) -> Self {
        self.attribute = attribute;
        self
    }

    /// Calculate the face normal from the triangle's vertices.
    ///
    /// Degenerate triangles yield the zero vector.
    pub fn calculate_normal(&self) -> Vector3<f32> {
        let [v0, v1, v2] = self.vertices.map(|p| p.coords.cast::<f64>());
        unit_or_zero((v1 - v0).cross(&(v2 - v0)))
    }
}

fn unit_or_zero(n: Vector3<f64>) -> Vector3<f32> {
    let norm = n.norm();
    if norm == 0.0 {
        Vector3::zeros()
    } else {
        (n / norm).cast::<f32>()
    }
}

fn homogeneous(p: &Point3<f32>) -> Vector4<f64> {
    Vector4::new(f64::from(p.x), f64::from(p.y), f64::from(p.z), 1.0)
}

fn cartesian(v: &Vector4<f64>) -> Point3<f32> {
    Point3::new(v.x as f32, v.y as f32, v.z as f32)
}

/// An ordered triangle soup.
///
/// Positions are kept in homogeneous form (`w == 1`) so every affine
/// transform is one matrix product. The three per-triangle arrays always
/// have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    name: String,
    vectors: Vec<[Vector4<f64>; 3]>,
    normals: Vec<Vector3<f32>>,
    attributes: Vec<u16>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            name: "empty".to_string(),
            vectors: Vec::with_capacity(capacity),
            normals: Vec::with_capacity(capacity),
            attributes: Vec::with_capacity(capacity),
        }
    }

    /// Build a mesh from a triangle soup, keeping its order
    pub fn from_triangles<I>(name: impl Into<String>, triangles: I) -> Self
    where
        I: IntoIterator<Item = Triangle>,
    {
        let triangles = triangles.into_iter();
        let mut mesh = Self::with_capacity(triangles.size_hint().0);
        mesh.name = name.into();
        for triangle in triangles {
            mesh.push(triangle);
        }
        mesh
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn push(&mut self, triangle: Triangle) {
        self.vectors.push(triangle.vertices.each_ref().map(homogeneous));
        self.normals.push(triangle.normal);
        self.attributes.push(triangle.attribute);
    }

    pub fn triangle(&self, index: usize) -> Option<Triangle> {
        let vectors = self.vectors.get(index)?;
        Some(Triangle {
            normal: self.normals[index],
            vertices: vectors.each_ref().map(cartesian),
            attribute: self.attributes[index],
        })
    }

    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        (0..self.len()).filter_map(move |i| self.triangle(i))
    }

    /// Homogeneous vertex positions, one `[v0, v1, v2]` entry per triangle
    pub fn vectors(&self) -> &[[Vector4<f64>; 3]] {
        &self.vectors
    }

    pub fn normals(&self) -> &[Vector3<f32>] {
        &self.normals
    }

    pub fn attributes(&self) -> &[u16] {
        &self.attributes
    }

    /// Right-multiply every vertex (as a row vector) by `matrix`
    pub fn transform(&mut self, matrix: &Matrix4<f64>) -> &mut Self {
        // v * M for a row vector is M^T * v for a column vector.
        let columns = matrix.transpose();
        for triangle in &mut self.vectors {
            for v in triangle.iter_mut() {
                *v = columns * *v;
            }
        }
        self
    }

    pub fn rotate_x(&mut self, degrees: f64) -> &mut Self {
        self.transform(&Transform::rotation_x(degrees))
    }

    pub fn rotate_y(&mut self, degrees: f64) -> &mut Self {
        self.transform(&Transform::rotation_y(degrees))
    }

    pub fn rotate_z(&mut self, degrees: f64) -> &mut Self {
        self.transform(&Transform::rotation_z(degrees))
    }

    pub fn translate_x(&mut self, distance: f64) -> &mut Self {
        self.transform(&Transform::translation(distance, 0.0, 0.0))
    }

    pub fn translate_y(&mut self, distance: f64) -> &mut Self {
        self.transform(&Transform::translation(0.0, distance, 0.0))
    }

    pub fn translate_z(&mut self, distance: f64) -> &mut Self {
        self.transform(&Transform::translation(0.0, 0.0, distance))
    }

    pub fn scale(&mut self, sx: f64, sy: f64, sz: f64) -> &mut Self {
        self.transform(&Transform::scale(sx, sy, sz))
    }

    /// Append another mesh's triangles after this mesh's
    pub fn join(&mut self, other: &Mesh) -> &mut Self {
        self.vectors.extend_from_slice(&other.vectors);
        self.normals.extend_from_slice(&other.normals);
        self.attributes.extend_from_slice(&other.attributes);
        self
    }

    /// Dynamically typed [`Mesh::join`] for callers holding untyped values.
    ///
    /// # Errors
    ///
    /// [`TypeMismatch::MissingArgument`] when `other` is `None`,
    /// [`TypeMismatch::WrongType`] when it is not a `Mesh`.
    pub fn join_any(&mut self, other: Option<&dyn Any>) -> MeshResult<&mut Self> {
        let other = other.ok_or(TypeMismatch::MissingArgument)?;
        let other = other
            .downcast_ref::<Mesh>()
            .ok_or(TypeMismatch::WrongType {
                found: "a non-mesh value",
            })?;
        Ok(self.join(other))
    }

    /// Recompute every facet normal from its winding.
    ///
    /// Zero-area triangles get the zero vector.
    pub fn update_normals(&mut self) -> &mut Self {
        for (normal, [v0, v1, v2]) in self.normals.iter_mut().zip(&self.vectors) {
            let e1 = (v1 - v0).xyz();
            let e2 = (v2 - v0).xyz();
            *normal = unit_or_zero(e1.cross(&e2));
        }
        self
    }

    /// Signed enclosed volume.
    ///
    /// Sums the signed volumes of the tetrahedra spanned by each triangle and
    /// the origin. Outward winding gives a positive total, inverted winding
    /// the negated one.
    pub fn volume(&self) -> f64 {
        self.vectors.iter().map(signed_volume).sum()
    }

    /// Create an axis-aligned cube centred on the origin, wound outward
    pub fn cube(size: f32) -> Self {
        let h = size / 2.0;
        let quads: [([f32; 3], [[f32; 3]; 4]); 6] = [
            ([0.0, 0.0, 1.0], [[-h, -h, h], [h, -h, h], [h, h, h], [-h, h, h]]),
            ([0.0, 0.0, -1.0], [[-h, -h, -h], [-h, h, -h], [h, h, -h], [h, -h, -h]]),
            ([0.0, 1.0, 0.0], [[-h, h, -h], [-h, h, h], [h, h, h], [h, h, -h]]),
            ([0.0, -1.0, 0.0], [[-h, -h, -h], [h, -h, -h], [h, -h, h], [-h, -h, h]]),
            ([1.0, 0.0, 0.0], [[h, -h, -h], [h, h, -h], [h, h, h], [h, -h, h]]),
            ([-1.0, 0.0, 0.0], [[-h, -h, -h], [-h, -h, h], [-h, h, h], [-h, h, -h]]),
        ];

        let mut mesh = Self::with_capacity(12);
        mesh.name = "cube".to_string();
        for (n, [a, b, c, d]) in quads {
            let normal = Vector3::from(n);
            mesh.push(Triangle::new(normal, [a.into(), b.into(), c.into()]));
            mesh.push(Triangle::new(normal, [a.into(), c.into(), d.into()]));
        }
        mesh
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

fn signed_volume(t: &[Vector4<f64>; 3]) -> f64 {
    let v321 = t[2].x * t[1].y * t[0].z;
    let v231 = t[1].x * t[2].y * t[0].z;
    let v312 = t[2].x * t[0].y * t[1].z;
    let v132 = t[0].x * t[2].y * t[1].z;
    let v213 = t[1].x * t[0].y * t[2].z;
    let v123 = t[0].x * t[1].y * t[2].z;
    (-v321 + v231 + v312 - v132 - v213 + v123) / 6.0
}
