/// Wavefront OBJ export of a triangle soup, with a minimal reader.
///
/// Export merges vertices and normals whose three components are
/// bit-identical; no tolerance is applied. Output order is:
///
/// ```text
/// # header comments
/// v x y z          (unique vertices, first-seen order)
/// vn nx ny nz      (unique normals, optional)
/// g name           (optional)
/// f a b c          or   f a//n b//n c//n
/// ```
use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::error::{MeshResult, ParseError};
use crate::geometry::{Mesh, Triangle};
use crate::{PRODUCT_NAME, PRODUCT_URL, PRODUCT_VERSION};

/// Options for OBJ export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjOptions {
    /// Recompute facet normals before export.
    pub update_normals: bool,
    /// Emit `vn` lines and `v//vn` faces.
    pub write_normals: bool,
    /// Emit a single `g <name>` line before the faces.
    pub group: Option<String>,
}

impl Default for ObjOptions {
    fn default() -> Self {
        Self {
            update_normals: true,
            write_normals: false,
            group: Some("patch0".to_string()),
        }
    }
}

/// First-seen-order table keyed by exact component bits.
struct IndexTable<K, V> {
    index: HashMap<K, usize>,
    values: Vec<V>,
}

impl<K: Hash + Eq, V> IndexTable<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            values: Vec::new(),
        }
    }

    /// 1-based OBJ index of `value`, inserting it if unseen.
    fn insert(&mut self, key: K, value: V) -> usize {
        let next = self.values.len();
        let i = *self.index.entry(key).or_insert(next);
        if i == next {
            self.values.push(value);
        }
        i + 1
    }
}

/// Indexed view of a mesh, ready to print.
struct ObjTables {
    vertices: Vec<[f64; 3]>,
    normals: Vec<Vector3<f32>>,
    faces: Vec<([usize; 3], usize)>,
}

impl ObjTables {
    fn build(mesh: &Mesh) -> Self {
        let mut vertices = IndexTable::new();
        let mut normals = IndexTable::new();
        let mut faces = Vec::with_capacity(mesh.len());

        for (triangle, normal) in mesh.vectors().iter().zip(mesh.normals()) {
            let corners = triangle.each_ref().map(|v| {
                let xyz = [v.x, v.y, v.z];
                vertices.insert(xyz.map(f64::to_bits), xyz)
            });
            let n = normals.insert([normal.x, normal.y, normal.z].map(f32::to_bits), *normal);
            faces.push((corners, n));
        }

        Self {
            vertices: vertices.values,
            normals: normals.values,
            faces,
        }
    }
}

/// Serialize a mesh as OBJ text.
///
/// Normals are written as stored; see [`Mesh::save_obj`] for the variant that
/// refreshes them first.
///
/// # Errors
///
/// Propagates write failures.
pub fn write_obj<W: Write>(mesh: &Mesh, writer: &mut W, options: &ObjOptions) -> MeshResult<()> {
    let tables = ObjTables::build(mesh);
    debug!(
        triangles = mesh.len(),
        vertices = tables.vertices.len(),
        normals = tables.normals.len(),
        "indexed mesh for OBJ"
    );

    writeln!(writer, "# {PRODUCT_NAME} {PRODUCT_VERSION}")?;
    writeln!(writer, "# {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"))?;
    writeln!(writer, "# {PRODUCT_URL}")?;

    for [x, y, z] in &tables.vertices {
        writeln!(writer, "v {x} {y} {z}")?;
    }
    if options.write_normals {
        for n in &tables.normals {
            writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }
    if let Some(group) = &options.group {
        writeln!(writer, "g {group}")?;
    }
    for ([a, b, c], n) in &tables.faces {
        if options.write_normals {
            writeln!(writer, "f {a}//{n} {b}//{n} {c}//{n}")?;
        } else {
            writeln!(writer, "f {a} {b} {c}")?;
        }
    }
    Ok(())
}

impl Mesh {
    /// Save the mesh as OBJ.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save_obj<P: AsRef<Path>>(&mut self, path: P, options: &ObjOptions) -> MeshResult<()> {
        let path = path.as_ref();
        if options.update_normals {
            self.update_normals();
        }

        let mut writer = BufWriter::new(File::create(path)?);
        write_obj(self, &mut writer, options)?;
        writer.flush()?;

        info!(path = %path.display(), triangles = self.len(), "wrote OBJ");
        Ok(())
    }

    /// Load a mesh from an OBJ file.
    ///
    /// # Errors
    ///
    /// See [`read_obj`].
    pub fn load_obj<P: AsRef<Path>>(path: P) -> MeshResult<Self> {
        read_obj(File::open(path)?)
    }
}

/// Read the `v`, `vn` and `f` directives of an OBJ stream into a triangle soup.
///
/// Polygons are fan-triangulated. Faces without normal references get the
/// zero normal; a face whose corners reference normals takes the first one.
/// Other directives are ignored.
///
/// # Errors
///
/// A non-recoverable parse error for malformed numbers or out-of-range
/// indices.
pub fn read_obj<R: Read>(reader: R) -> MeshResult<Mesh> {
    let mut positions: Vec<Point3<f32>> = Vec::new();
    let mut normals: Vec<Vector3<f32>> = Vec::new();
    let mut mesh = Mesh::new();
    let mut group = None;

    for (i, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        let mut parts = line.split_whitespace();
        let fail = |message: String| ParseError::new(message, line_no, false);

        match parts.next() {
            Some("v") => {
                let v = parse_xyz(&mut parts).ok_or_else(|| fail(format!("bad vertex {line:?}")))?;
                positions.push(v.into());
            }
            Some("vn") => {
                let n = parse_xyz(&mut parts).ok_or_else(|| fail(format!("bad normal {line:?}")))?;
                normals.push(n);
            }
            Some("g") if group.is_none() => group = parts.next().map(str::to_string),
            Some("f") => {
                let corners = parts
                    .map(|corner| parse_corner(corner, positions.len(), normals.len()))
                    .collect::<Option<Vec<_>>>()
                    .filter(|c| c.len() >= 3)
                    .ok_or_else(|| fail(format!("bad face {line:?}")))?;

                let normal = corners[0].1.map_or_else(Vector3::zeros, |n| normals[n]);
                for pair in corners[1..].windows(2) {
                    mesh.push(Triangle::new(
                        normal,
                        [positions[corners[0].0], positions[pair[0].0], positions[pair[1].0]],
                    ));
                }
            }
            _ => {}
        }
    }

    mesh.set_name(group.unwrap_or_default());
    debug!(triangles = mesh.len(), vertices = positions.len(), "read OBJ");
    Ok(mesh)
}

fn parse_xyz<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Option<Vector3<f32>> {
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some(Vector3::new(x, y, z))
}

/// Parse `v`, `v/vt`, `v//vn` or `v/vt/vn` into 0-based position and normal indices.
fn parse_corner(corner: &str, positions: usize, normals: usize) -> Option<(usize, Option<usize>)> {
    let mut fields = corner.split('/');
    let v = resolve_index(fields.next()?, positions)?;
    let _texture = fields.next();
    let n = match fields.next() {
        Some(n) if !n.is_empty() => Some(resolve_index(n, normals)?),
        _ => None,
    };
    Some((v, n))
}

/// OBJ indices are 1-based; negative values count back from the end.
fn resolve_index(field: &str, len: usize) -> Option<usize> {
    let i: i64 = field.parse().ok()?;
    let resolved = if i < 0 { len as i64 + i } else { i - 1 };
    usize::try_from(resolved).ok().filter(|&r| r < len)
}
