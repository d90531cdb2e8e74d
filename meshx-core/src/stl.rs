/// STL file reader and writer for binary and ASCII formats.
///
/// # Binary layout
///
/// ```text
/// UINT8[80]    – Header (ignored on read)
/// UINT32       – Number of triangles, little-endian
/// foreach triangle
///     REAL32[3] – Normal vector
///     REAL32[3] – Vertex 1
///     REAL32[3] – Vertex 2
///     REAL32[3] – Vertex 3
///     UINT16    – Attribute word
/// end
/// ```
///
/// # ASCII layout
///
/// ```text
/// solid name
/// facet normal ni nj nk
///   outer loop
///     vertex v1x v1y v1z
///     vertex v2x v2y v2z
///     vertex v3x v3y v3z
///   endloop
/// endfacet
/// endsolid name
/// ```
///
/// The ASCII reader pulls the source in fixed-size chunks and never seeks, so
/// pipes and sockets work. While no triangle has been produced, a grammar
/// error is recoverable: in [`StlMode::Auto`] the bytes consumed so far are
/// replayed through the binary reader.
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use nalgebra::{Point3, Vector3};
use nom::{
    bytes::complete::tag,
    character::complete::{multispace0, multispace1},
    combinator::all_consuming,
    number::complete::float,
    sequence::{preceded, tuple},
    IResult,
};
use tracing::{debug, info, warn};

use crate::error::{FormatError, MeshError, MeshResult, ParseError};
use crate::geometry::{Mesh, Triangle};
use crate::{PRODUCT_NAME, PRODUCT_VERSION};

/// Binary header size in bytes.
pub const HEADER_SIZE: usize = 80;

/// Size of one binary record (normal + 3 vertices + attribute).
pub const RECORD_SIZE: usize = 50;

/// Binary triangle counts at or above this are rejected.
pub const MAX_TRIANGLES: u32 = 1_000_000;

/// Refill size of the ASCII line buffer.
const BUFFER_SIZE: usize = 4096;

/// How a stream should be interpreted when it is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StlMode {
    /// Sniff the header: text is tried as ASCII first, then as binary.
    #[default]
    Auto,
    Ascii,
    Binary,
}

/// Concrete on-disk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StlFormat {
    Ascii,
    #[default]
    Binary,
}

/// Options for [`Mesh::save_stl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StlWriteOptions {
    pub format: StlFormat,
    /// Recompute facet normals from winding before writing.
    pub update_normals: bool,
}

impl StlWriteOptions {
    pub fn ascii() -> Self {
        Self {
            format: StlFormat::Ascii,
            ..Self::default()
        }
    }

    pub fn binary() -> Self {
        Self::default()
    }
}

impl Default for StlWriteOptions {
    fn default() -> Self {
        Self {
            format: StlFormat::Binary,
            update_normals: true,
        }
    }
}

/// Decoding strategy, fixed once the header has been sniffed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Ascii,
    AsciiOrBinary,
    Binary,
}

impl Decode {
    fn resolve(mode: StlMode, head: &[u8]) -> Self {
        match mode {
            StlMode::Ascii => Self::Ascii,
            StlMode::Binary => Self::Binary,
            StlMode::Auto if looks_like_text(head) => Self::AsciiOrBinary,
            StlMode::Auto => Self::Binary,
        }
    }
}

/// Text unless a NUL or control byte other than tab, CR or LF shows up.
/// Bytes above 0x7f are allowed so UTF-8 solid names still count as text.
fn looks_like_text(head: &[u8]) -> bool {
    !head
        .iter()
        .any(|&b| b.is_ascii_control() && !matches!(b, b'\t' | b'\r' | b'\n'))
}

/// Read an STL stream, returning the mesh and the encoding it was decoded from.
///
/// # Errors
///
/// [`MeshError::Format`] for binary layout violations, [`MeshError::Parse`]
/// for ASCII grammar violations that could not fall back to binary, and
/// [`MeshError::Io`] for read failures.
pub fn read_stl<R: Read>(mut reader: R, mode: StlMode) -> MeshResult<(Mesh, StlFormat)> {
    let mut head = vec![0u8; HEADER_SIZE];
    let got = read_full(&mut reader, &mut head)?;
    head.truncate(got);
    if head.is_empty() {
        return Err(FormatError::Empty.into());
    }

    let decode = Decode::resolve(mode, &head);
    debug!(?mode, ?decode, "opening STL stream");

    let result = match decode {
        Decode::Binary => (read_binary(Cursor::new(head).chain(reader))?, StlFormat::Binary),
        Decode::Ascii => {
            let mut parser = AsciiReader::with_prefix(head, reader);
            (collect_solid(&mut parser)?, StlFormat::Ascii)
        }
        Decode::AsciiOrBinary => {
            let mut parser = AsciiReader::with_prefix(head, reader);
            match collect_solid(&mut parser) {
                Ok(mesh) => (mesh, StlFormat::Ascii),
                Err(e) if e.is_recoverable() => {
                    warn!("not an ASCII STL ({e}), reading as binary");
                    let (consumed, rest) = parser.into_replay();
                    (read_binary(Cursor::new(consumed).chain(rest))?, StlFormat::Binary)
                }
                Err(e) => return Err(e),
            }
        }
    };

    debug!(triangles = result.0.len(), format = ?result.1, "read STL");
    Ok(result)
}

/// Open and read an STL file.
///
/// # Errors
///
/// See [`read_stl`].
pub fn load_stl<P: AsRef<Path>>(path: P, mode: StlMode) -> MeshResult<(Mesh, StlFormat)> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading STL");
    read_stl(File::open(path)?, mode)
}

impl Mesh {
    /// Load a mesh from an STL file.
    ///
    /// # Errors
    ///
    /// See [`read_stl`].
    pub fn load_stl<P: AsRef<Path>>(path: P, mode: StlMode) -> MeshResult<Self> {
        load_stl(path, mode).map(|(mesh, _)| mesh)
    }

    /// Save the mesh as STL, named after the file.
    ///
    /// A failed write is not rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save_stl<P: AsRef<Path>>(&mut self, path: P, options: &StlWriteOptions) -> MeshResult<()> {
        let path = path.as_ref();
        if options.update_normals {
            self.update_normals();
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut writer = BufWriter::new(File::create(path)?);
        write_stl(self, &mut writer, options.format, &name)?;
        writer.flush()?;

        info!(path = %path.display(), triangles = self.len(), format = ?options.format, "wrote STL");
        Ok(())
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read a binary STL stream, header included.
///
/// # Errors
///
/// [`FormatError::HeaderTooShort`], [`FormatError::TooManyTriangles`] (raised
/// before anything is allocated) or [`FormatError::Truncated`].
pub fn read_binary<R: Read>(mut reader: R) -> MeshResult<Mesh> {
    let mut head = [0u8; HEADER_SIZE + 4];
    let got = read_full(&mut reader, &mut head)?;
    if got < head.len() {
        return Err(FormatError::HeaderTooShort { got }.into());
    }

    let count = u32::from_le_bytes([
        head[HEADER_SIZE],
        head[HEADER_SIZE + 1],
        head[HEADER_SIZE + 2],
        head[HEADER_SIZE + 3],
    ]);
    if count >= MAX_TRIANGLES {
        return Err(FormatError::TooManyTriangles { count }.into());
    }

    let mut mesh = Mesh::with_capacity(count as usize);
    mesh.set_name("");
    let mut record = [0u8; RECORD_SIZE];
    for i in 0..count {
        if read_full(&mut reader, &mut record)? < RECORD_SIZE {
            return Err(FormatError::Truncated {
                expected: count,
                got: i,
            }
            .into());
        }

        let normal = read_vector(&record[0..12]);
        let v0 = read_vector(&record[12..24]);
        let v1 = read_vector(&record[24..36]);
        let v2 = read_vector(&record[36..48]);
        let attribute = u16::from_le_bytes([record[48], record[49]]);

        mesh.push(
            Triangle::new(normal, [v0.into(), v1.into(), v2.into()]).with_attribute(attribute),
        );
    }

    Ok(mesh)
}

fn read_vector(buf: &[u8]) -> Vector3<f32> {
    let x = f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let y = f32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let z = f32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    Vector3::new(x, y, z)
}

/// Read a single-solid ASCII STL stream.
///
/// # Errors
///
/// [`MeshError::Parse`] on any grammar violation, recoverable or not.
pub fn read_ascii<R: Read>(reader: R) -> MeshResult<Mesh> {
    collect_solid(&mut AsciiReader::new(reader))
}

/// Read every solid of a (possibly multi-solid) ASCII STL stream.
///
/// # Errors
///
/// [`MeshError::Parse`] on any grammar violation.
pub fn read_ascii_solids<R: Read>(reader: R) -> MeshResult<Vec<Mesh>> {
    let mut parser = AsciiReader::new(reader);
    let mut solids = Vec::new();
    while parser.begin_solid()? {
        solids.push(collect_solid(&mut parser)?);
    }
    Ok(solids)
}

fn collect_solid<R: Read>(parser: &mut AsciiReader<R>) -> MeshResult<Mesh> {
    let mut mesh = Mesh::new();
    for event in parser.by_ref() {
        match event {
            AsciiEvent::Triangle(triangle) => mesh.push(triangle),
            AsciiEvent::EndOfSolid => break,
            AsciiEvent::Error(e) => return Err(e),
        }
    }
    mesh.set_name(parser.name());
    Ok(mesh)
}

/// One step of the streaming ASCII parser
#[derive(Debug)]
pub enum AsciiEvent {
    Triangle(Triangle),
    /// `endsolid` was reached.
    EndOfSolid,
    /// Grammar or read failure; check [`MeshError::is_recoverable`].
    Error(MeshError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Facets,
    Done,
}

/// Lazy ASCII STL producer over any [`Read`] source.
///
/// Iterating yields [`AsciiEvent::Triangle`] items and ends after a single
/// [`AsciiEvent::EndOfSolid`] or [`AsciiEvent::Error`].
pub struct AsciiReader<R> {
    source: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
    line: usize,
    produced: usize,
    name: String,
    state: State,
    /// Every byte taken from `source`, kept only while errors are recoverable.
    consumed: Option<Vec<u8>>,
}

impl<R: Read> AsciiReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_prefix(Vec::new(), source)
    }

    /// Start from bytes already taken off `source` (usually the sniffed header).
    pub fn with_prefix(prefix: Vec<u8>, source: R) -> Self {
        Self {
            source,
            consumed: Some(prefix.clone()),
            buf: prefix,
            pos: 0,
            eof: false,
            line: 0,
            produced: 0,
            name: String::new(),
            state: State::Header,
        }
    }

    /// Name from the current `solid` line.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Triangles produced so far, across all solids.
    pub fn produced(&self) -> usize {
        self.produced
    }

    fn recoverable(&self) -> bool {
        self.produced == 0
    }

    /// Give back everything read from the source so far, plus the source.
    ///
    /// Empty once a triangle has been produced, since the bytes are no
    /// longer retained.
    pub fn into_replay(self) -> (Vec<u8>, R) {
        (self.consumed.unwrap_or_default(), self.source)
    }

    fn fill(&mut self) -> io::Result<()> {
        self.buf.drain(..self.pos);
        self.pos = 0;

        let mut chunk = [0u8; BUFFER_SIZE];
        let n = loop {
            match self.source.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
            if let Some(consumed) = self.consumed.as_mut() {
                consumed.extend_from_slice(&chunk[..n]);
            }
        }
        Ok(())
    }

    /// Next non-blank line, trimmed. `None` at end of input.
    fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let rest = &self.buf[self.pos..];
            let raw = if let Some(i) = rest.iter().position(|&b| b == b'\n') {
                let raw = String::from_utf8_lossy(&rest[..i]).into_owned();
                self.pos += i + 1;
                raw
            } else if self.eof {
                if rest.is_empty() {
                    return Ok(None);
                }
                let raw = String::from_utf8_lossy(rest).into_owned();
                self.pos = self.buf.len();
                raw
            } else {
                self.fill()?;
                continue;
            };

            self.line += 1;
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> MeshError {
        ParseError::new(message, self.line, self.recoverable()).into()
    }

    /// Consume the next `solid` line.
    ///
    /// Returns `Ok(false)` when the input is exhausted.
    ///
    /// # Errors
    ///
    /// A parse error if the next line is not a `solid` line.
    pub fn begin_solid(&mut self) -> MeshResult<bool> {
        let Some(line) = self.next_line()? else {
            self.state = State::Done;
            return Ok(false);
        };

        let lower = line.to_ascii_lowercase();
        if !lower.starts_with("solid") {
            self.state = State::Done;
            return Err(self.error(format!("{lower:?} should start with \"solid\"")));
        }
        if lower.len() > "solid".len() && !lower.starts_with("solid ") {
            warn!(line = self.line, "missing space after solid");
        }

        self.name = line["solid".len()..].trim().to_string();
        self.state = State::Facets;
        Ok(true)
    }

    fn expect_line(&mut self) -> MeshResult<String> {
        match self.next_line()? {
            Some(line) => Ok(line.to_ascii_lowercase()),
            None => Err(self.error("unable to find more lines")),
        }
    }

    fn expect_keyword(&mut self, keyword: &[&str]) -> MeshResult<()> {
        let line = self.expect_line()?;
        if line.split_whitespace().eq(keyword.iter().copied()) {
            Ok(())
        } else {
            Err(self.error(format!("{line:?} should be {:?}", keyword.join(" "))))
        }
    }

    fn expect_vertex(&mut self) -> MeshResult<Point3<f32>> {
        let line = self.expect_line()?;
        let v = match all_consuming(vertex)(line.as_str()) {
            Ok((_, v)) => v,
            Err(_) => return Err(self.error(format!("{line:?} should be \"vertex x y z\""))),
        };
        Ok(v.into())
    }

    /// Parse one facet block, or recognise `endsolid`.
    fn facet(&mut self) -> MeshResult<Option<Triangle>> {
        let line = self.expect_line()?;
        if line.starts_with("endsolid") {
            return Ok(None);
        }
        let normal = match all_consuming(facet_normal)(line.as_str()) {
            Ok((_, n)) => n,
            Err(_) => return Err(self.error(format!("{line:?} should start with \"facet normal\""))),
        };

        self.expect_keyword(&["outer", "loop"])?;
        let v0 = self.expect_vertex()?;
        let v1 = self.expect_vertex()?;
        let v2 = self.expect_vertex()?;
        self.expect_keyword(&["endloop"])?;
        self.expect_keyword(&["endfacet"])?;

        Ok(Some(Triangle::new(normal, [v0, v1, v2])))
    }

    fn next_event(&mut self) -> AsciiEvent {
        if self.state == State::Header {
            match self.begin_solid() {
                Ok(true) => {}
                Ok(false) => return AsciiEvent::Error(self.error("no lines found, impossible to read")),
                Err(e) => return AsciiEvent::Error(e),
            }
        }

        match self.facet() {
            Ok(Some(triangle)) => {
                self.produced += 1;
                // Past the first triangle a binary retry is no longer allowed.
                self.consumed = None;
                AsciiEvent::Triangle(triangle)
            }
            Ok(None) => AsciiEvent::EndOfSolid,
            Err(e) => AsciiEvent::Error(e),
        }
    }
}

impl<R: Read> Iterator for AsciiReader<R> {
    type Item = AsciiEvent;

    fn next(&mut self) -> Option<AsciiEvent> {
        if self.state == State::Done {
            return None;
        }
        let event = self.next_event();
        if !matches!(event, AsciiEvent::Triangle(_)) {
            self.state = State::Done;
        }
        Some(event)
    }
}

fn facet_normal(input: &str) -> IResult<&str, Vector3<f32>> {
    let (input, _) = tuple((tag("facet"), multispace1, tag("normal")))(input)?;
    vector3(input)
}

fn vertex(input: &str) -> IResult<&str, Vector3<f32>> {
    preceded(tag("vertex"), vector3)(input)
}

fn vector3(input: &str) -> IResult<&str, Vector3<f32>> {
    let (input, _) = multispace1(input)?;
    let (input, x) = float(input)?;
    let (input, _) = multispace1(input)?;
    let (input, y) = float(input)?;
    let (input, _) = multispace1(input)?;
    let (input, z) = float(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, Vector3::new(x, y, z)))
}

/// Write a mesh in the given encoding.
///
/// Normals are written as stored; see [`Mesh::update_normals`].
///
/// # Errors
///
/// Propagates write failures.
pub fn write_stl<W: Write>(mesh: &Mesh, writer: &mut W, format: StlFormat, name: &str) -> MeshResult<()> {
    match format {
        StlFormat::Ascii => write_ascii(mesh, writer, name),
        StlFormat::Binary => write_binary(mesh, writer, name),
    }
}

/// Build the 80-byte binary header: product, version, timestamp and name,
/// truncated or space padded.
pub fn binary_header(name: &str) -> [u8; HEADER_SIZE] {
    let text = format!(
        "{PRODUCT_NAME} ({PRODUCT_VERSION}) {} {name}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f")
    );
    let mut header = [b' '; HEADER_SIZE];
    let bytes = text.as_bytes();
    let len = bytes.len().min(HEADER_SIZE);
    header[..len].copy_from_slice(&bytes[..len]);
    header
}

/// Write a binary STL.
///
/// # Errors
///
/// Propagates write failures. Meshes with more than `u32::MAX` triangles are
/// rejected with [`FormatError::TooManyTriangles`].
pub fn write_binary<W: Write>(mesh: &Mesh, writer: &mut W, name: &str) -> MeshResult<()> {
    let count = u32::try_from(mesh.len())
        .map_err(|_| FormatError::TooManyTriangles { count: u32::MAX })?;

    writer.write_all(&binary_header(name))?;
    writer.write_all(&count.to_le_bytes())?;

    let mut record = [0u8; RECORD_SIZE];
    for triangle in mesh.triangles() {
        let values = std::iter::once(triangle.normal)
            .chain(triangle.vertices.iter().map(|p| p.coords))
            .flat_map(|v| [v.x, v.y, v.z]);
        for (slot, value) in record[..48].chunks_exact_mut(4).zip(values) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        record[48..].copy_from_slice(&triangle.attribute.to_le_bytes());
        writer.write_all(&record)?;
    }

    Ok(())
}

/// Write one ASCII solid. Several solids may be written to the same sink.
///
/// # Errors
///
/// Propagates write failures.
pub fn write_ascii<W: Write>(mesh: &Mesh, writer: &mut W, name: &str) -> MeshResult<()> {
    writeln!(writer, "solid {name}")?;
    for (normal, [v0, v1, v2]) in mesh.normals().iter().zip(mesh.vectors()) {
        writeln!(writer, "facet normal {:.6} {:.6} {:.6}", normal.x, normal.y, normal.z)?;
        writeln!(writer, "  outer loop")?;
        for v in [v0, v1, v2] {
            writeln!(writer, "    vertex {:.6} {:.6} {:.6}", v.x, v.y, v.z)?;
        }
        writeln!(writer, "  endloop")?;
        writeln!(writer, "endfacet")?;
    }
    writeln!(writer, "endsolid {name}")?;
    Ok(())
}

/// Count the solids of an ASCII STL file and collect their names.
///
/// # Errors
///
/// A non-recoverable parse error if a `solid` line does not carry exactly one
/// name.
pub fn regions<P: AsRef<Path>>(path: P) -> MeshResult<(usize, Vec<String>)> {
    let reader = BufReader::new(File::open(path)?);
    let mut names = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if !line.contains("solid") || line.contains("endsolid") {
            continue;
        }
        let items: Vec<&str> = line.split_whitespace().collect();
        if items.len() != 2 {
            return Err(ParseError::new(
                format!("line expected to contain 2 items, found {}", items.len()),
                i + 1,
                false,
            )
            .into());
        }
        names.push(items[1].to_string());
    }
    Ok((names.len(), names))
}

/// Concatenate ASCII STL files into a single multi-solid file.
///
/// # Errors
///
/// Propagates I/O failures; a partially written target is left in place.
pub fn merge_files<P: AsRef<Path>, Q: AsRef<Path>>(inputs: &[P], target: Q) -> MeshResult<()> {
    let target = target.as_ref();
    let mut out = BufWriter::new(File::create(target)?);
    for input in inputs {
        let content = std::fs::read(input)?;
        out.write_all(&content)?;
        if !content.is_empty() && !content.ends_with(b"\n") {
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;
    info!(path = %target.display(), files = inputs.len(), "merged STL files");
    Ok(())
}

/// Uniformly scale an STL file into a new file of the same encoding.
///
/// # Errors
///
/// Any read, parse or write error.
pub fn scale_file<P: AsRef<Path>, Q: AsRef<Path>>(input: P, factor: f64, output: Q) -> MeshResult<()> {
    let (mut mesh, format) = load_stl(input.as_ref(), StlMode::Auto)?;
    info!(
        input = %input.as_ref().display(),
        factor,
        output = %output.as_ref().display(),
        "scaling STL"
    );
    mesh.scale(factor, factor, factor).update_normals();

    let mut writer = BufWriter::new(File::create(output.as_ref())?);
    let name = mesh.name().to_string();
    write_stl(&mesh, &mut writer, format, &name)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// A `Read` that hands out at most `step` bytes per call, like a pipe.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn sample_mesh() -> Mesh {
        let mut mesh = Mesh::cube(2.0);
        mesh.translate_x(0.25).rotate_z(10.0);
        mesh
    }

    fn binary_bytes(mesh: &Mesh) -> Vec<u8> {
        let mut buf = Vec::new();
        write_binary(mesh, &mut buf, "sample.stl").unwrap();
        buf
    }

    fn ascii_bytes(mesh: &Mesh, name: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        write_ascii(mesh, &mut buf, name).unwrap();
        buf
    }

    const ONE_FACET: &str = "solid part
facet normal 0 0 1
  outer loop
    vertex 0 0 0
    vertex 1 0 0
    vertex 0 1 0
  endloop
endfacet
";

    #[test]
    fn test_parse_binary_header() {
        let mut data = vec![0u8; 84];
        data[80..84].copy_from_slice(&0u32.to_le_bytes());

        let (mesh, format) = read_stl(data.as_slice(), StlMode::Auto).unwrap();
        assert_eq!(mesh.len(), 0);
        assert_eq!(format, StlFormat::Binary);
    }

    #[test]
    fn test_binary_layout_is_exact() {
        let mut mesh = Mesh::cube(1.0);
        mesh.update_normals();
        let bytes = binary_bytes(&mesh);
        assert_eq!(bytes.len(), HEADER_SIZE + 4 + 12 * RECORD_SIZE);
        assert_eq!(&bytes[80..84], &12u32.to_le_bytes());
        assert!(bytes[..80].starts_with(PRODUCT_NAME.as_bytes()));

        let first = mesh.triangle(0).unwrap();
        let rec = &bytes[84..84 + RECORD_SIZE];
        assert_eq!(&rec[0..4], &first.normal.x.to_le_bytes());
        assert_eq!(&rec[12..16], &first.vertices[0].x.to_le_bytes());
        assert_eq!(&rec[44..48], &first.vertices[2].z.to_le_bytes());
        assert_eq!(&rec[48..50], &0u16.to_le_bytes());
    }

    #[test]
    fn test_binary_header_truncated_to_80() {
        let header = binary_header(&"x".repeat(200));
        assert_eq!(header.len(), HEADER_SIZE);
        assert_eq!(header[79], b'x');

        let header = binary_header("a.stl");
        assert_eq!(header[79], b' ');
    }

    #[test]
    fn test_binary_round_trip_exact() {
        let mut mesh = sample_mesh();
        mesh.update_normals();
        let mut with_attr = Mesh::new();
        for (i, t) in mesh.triangles().enumerate() {
            with_attr.push(t.with_attribute(i as u16 * 3));
        }

        let (back, format) = read_stl(binary_bytes(&with_attr).as_slice(), StlMode::Binary).unwrap();
        assert_eq!(format, StlFormat::Binary);
        assert_eq!(back.len(), with_attr.len());
        for (a, b) in back.triangles().zip(with_attr.triangles()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_binary_count_over_limit_rejected() {
        let mut data = vec![0u8; 84];
        data[80..84].copy_from_slice(&2_000_000u32.to_le_bytes());
        let err = read_stl(data.as_slice(), StlMode::Binary).unwrap_err();
        assert!(matches!(
            err,
            MeshError::Format(FormatError::TooManyTriangles { count: 2_000_000 })
        ));

        data[80..84].copy_from_slice(&MAX_TRIANGLES.to_le_bytes());
        assert!(matches!(
            read_binary(data.as_slice()),
            Err(MeshError::Format(FormatError::TooManyTriangles { .. }))
        ));
    }

    #[test]
    fn test_binary_short_header_rejected() {
        let err = read_stl(&[0u8; 40][..], StlMode::Binary).unwrap_err();
        assert!(matches!(err, MeshError::Format(FormatError::HeaderTooShort { got: 40 })));
    }

    #[test]
    fn test_binary_truncated_records() {
        let mut bytes = binary_bytes(&Mesh::cube(1.0));
        bytes.truncate(84 + 3 * RECORD_SIZE + 10);
        let err = read_binary(bytes.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            MeshError::Format(FormatError::Truncated { expected: 12, got: 3 })
        ));
    }

    #[test]
    fn test_empty_stream() {
        let err = read_stl(io::empty(), StlMode::Auto).unwrap_err();
        assert!(matches!(err, MeshError::Format(FormatError::Empty)));
    }

    #[test]
    fn test_ascii_round_trip_within_precision() {
        let mut mesh = sample_mesh();
        mesh.update_normals();
        let bytes = ascii_bytes(&mesh, "sample");

        let (back, format) = read_stl(bytes.as_slice(), StlMode::Auto).unwrap();
        assert_eq!(format, StlFormat::Ascii);
        assert_eq!(back.name(), "sample");
        assert_eq!(back.len(), mesh.len());
        for (a, b) in back.triangles().zip(mesh.triangles()) {
            assert_relative_eq!(a.normal, b.normal, epsilon = 1e-6);
            for (va, vb) in a.vertices.iter().zip(&b.vertices) {
                assert_relative_eq!(va, vb, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_ascii_six_decimals() {
        let mesh = Mesh::from_triangles(
            "t",
            [Triangle::new(
                Vector3::new(0.0, 0.0, 1.0),
                [[0.5, 0.0, 0.0].into(), [1.0, 0.0, 0.0].into(), [0.0, 1.0, 0.0].into()],
            )],
        );
        let text = String::from_utf8(ascii_bytes(&mesh, "t")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "solid t");
        assert_eq!(lines[1], "facet normal 0.000000 0.000000 1.000000");
        assert_eq!(lines[2], "  outer loop");
        assert_eq!(lines[3], "    vertex 0.500000 0.000000 0.000000");
        assert_eq!(lines[6], "  endloop");
        assert_eq!(lines[7], "endfacet");
        assert_eq!(lines[8], "endsolid t");
    }

    #[test]
    fn test_ascii_streams_through_small_reads() {
        let mesh = sample_mesh();
        let bytes = ascii_bytes(&mesh, "trickle");
        let source = Trickle {
            data: &bytes,
            step: 7,
        };
        let (back, format) = read_stl(source, StlMode::Auto).unwrap();
        assert_eq!(format, StlFormat::Ascii);
        assert_eq!(back.len(), mesh.len());
    }

    #[test]
    fn test_ascii_tolerates_case_and_blank_lines() {
        let text = "SOLID Part\n\nFACET NORMAL 0 0 1\n OUTER   LOOP\n VERTEX 0 0 0\n VERTEX 1 0 0\n VERTEX 0 1 0\n ENDLOOP\n ENDFACET\nENDSOLID Part";
        let mesh = read_ascii(text.as_bytes()).unwrap();
        assert_eq!(mesh.len(), 1);
        assert_eq!(mesh.name(), "Part");
    }

    #[test]
    fn test_missing_outer_loop_first_facet_is_recoverable() {
        let text = "solid part\nfacet normal 0 0 1\n    vertex 0 0 0\n";
        let err = read_stl(text.as_bytes(), StlMode::Ascii).unwrap_err();
        assert!(err.is_recoverable());
        match err {
            MeshError::Parse(e) => assert_eq!(e.line, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_outer_loop_after_triangle_is_fatal() {
        let text = format!("{ONE_FACET}facet normal 0 0 1\n    vertex 0 0 0\n");
        let err = read_stl(text.as_bytes(), StlMode::Auto).unwrap_err();
        assert!(matches!(err, MeshError::Parse(ParseError { recoverable: false, .. })));
    }

    #[test]
    fn test_missing_endsolid_after_triangle_is_fatal() {
        let err = read_ascii(ONE_FACET.as_bytes()).unwrap_err();
        match err {
            // Reported against the last line that was read.
            MeshError::Parse(e) => {
                assert!(!e.recoverable);
                assert_eq!(e.line, 8);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_short_vertex_line_is_rejected() {
        let text = "solid part\nfacet normal 0 0 1\nouter loop\nvertex 0 0\n";
        let err = read_stl(text.as_bytes(), StlMode::Ascii).unwrap_err();
        match err {
            MeshError::Parse(e) => {
                assert!(e.recoverable);
                assert_eq!(e.line, 4);
                assert!(e.message.contains("vertex x y z"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_text_sniff_accepts_utf8_and_rejects_control_bytes() {
        assert!(looks_like_text("solid pièce.stl\r\n\tfacet".as_bytes()));
        assert!(!looks_like_text(b"solid part\0\0\0"));
        assert!(!looks_like_text(&[b's', b'o', 0x01, 0x02]));
    }

    #[test]
    fn test_auto_reads_ascii_with_utf8_name() {
        let mesh = sample_mesh();
        let bytes = ascii_bytes(&mesh, "pièce.stl");
        let (back, format) = read_stl(bytes.as_slice(), StlMode::Auto).unwrap();
        assert_eq!(format, StlFormat::Ascii);
        assert_eq!(back.name(), "pièce.stl");
        assert_eq!(back.len(), mesh.len());
    }

    #[test]
    fn test_parser_events() {
        let text = format!("{ONE_FACET}endsolid part\n");
        let mut parser = AsciiReader::new(text.as_bytes());
        let events: Vec<AsciiEvent> = parser.by_ref().collect();
        assert_eq!(parser.produced(), 1);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AsciiEvent::Triangle(_)));
        assert!(matches!(events[1], AsciiEvent::EndOfSolid));
    }

    #[test]
    fn test_auto_falls_back_to_binary_for_text_header() {
        // Our own binary header is printable, so auto mode tries ASCII first.
        let mut mesh = sample_mesh();
        mesh.update_normals();
        let bytes = binary_bytes(&mesh);
        assert!(looks_like_text(&bytes[..HEADER_SIZE]));

        let source = Trickle {
            data: &bytes,
            step: 13,
        };
        let (back, format) = read_stl(source, StlMode::Auto).unwrap();
        assert_eq!(format, StlFormat::Binary);
        assert_eq!(back.len(), mesh.len());
        for (a, b) in back.triangles().zip(mesh.triangles()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_auto_falls_back_when_header_starts_with_solid() {
        let mesh = Mesh::cube(1.0);
        let mut bytes = binary_bytes(&mesh);
        bytes[..HEADER_SIZE].fill(b' ');
        bytes[..12].copy_from_slice(b"solid binary");
        let (back, format) = read_stl(bytes.as_slice(), StlMode::Auto).unwrap();
        assert_eq!(format, StlFormat::Binary);
        assert_eq!(back.len(), 12);
    }

    #[test]
    fn test_explicit_ascii_mode_never_falls_back() {
        let bytes = binary_bytes(&Mesh::cube(1.0));
        let err = read_stl(bytes.as_slice(), StlMode::Ascii).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_multi_solid_stream() {
        let mut buf = Vec::new();
        write_ascii(&Mesh::cube(1.0), &mut buf, "first").unwrap();
        write_ascii(&Mesh::cube(2.0), &mut buf, "second").unwrap();

        let solids = read_ascii_solids(buf.as_slice()).unwrap();
        assert_eq!(solids.len(), 2);
        assert_eq!(solids[0].name(), "first");
        assert_eq!(solids[1].name(), "second");
        assert_eq!(solids[1].len(), 12);

        let (first, _) = read_stl(buf.as_slice(), StlMode::Auto).unwrap();
        assert_eq!(first.name(), "first");
    }

    #[test]
    fn test_regions_merge_and_scale_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.stl");
        let b = dir.path().join("b.stl");
        let merged = dir.path().join("merged.stl");
        Mesh::cube(1.0).save_stl(&a, &StlWriteOptions::ascii()).unwrap();
        Mesh::cube(1.0).save_stl(&b, &StlWriteOptions::ascii()).unwrap();

        merge_files(&[&a, &b], &merged).unwrap();
        let (count, names) = regions(&merged).unwrap();
        assert_eq!(count, 2);
        assert_eq!(names, vec!["a.stl".to_string(), "b.stl".to_string()]);

        let scaled = dir.path().join("scaled.stl");
        scale_file(&a, 2.0, &scaled).unwrap();
        let (mesh, format) = load_stl(&scaled, StlMode::Auto).unwrap();
        assert_eq!(format, StlFormat::Ascii);
        assert_relative_eq!(mesh.volume(), 8.0, epsilon = 1e-6);
    }

    #[test]
    fn test_regions_rejects_unnamed_solid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.stl");
        std::fs::write(&path, "solid\nendsolid\n").unwrap();
        let err = regions(&path).unwrap_err();
        assert!(matches!(err, MeshError::Parse(ParseError { line: 1, .. })));
    }
}
