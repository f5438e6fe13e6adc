//! Mesh file formats.
//!
//! Fragments and assembled objects use the AXMS binary format, which keeps
//! error scalars. Level-of-detail meshes are written as Wavefront OBJ.
//!
//! ## AXMS Binary Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `[0x41, 0x58, 0x4D, 0x53]` ("AXMS") |
//! | 4 | 1 | Format version (`u8`, currently 1) |
//! | 5 | 1 | Flags (bit 0: error scalars present) |
//! | 6 | 4 | Vertex count `V` (`u32`, little-endian) |
//! | 10 | 4 | Triangle count `T` (`u32`, little-endian) |
//! | 14 | 12V | Positions (3 × `f32` LE per vertex) |
//! | 14+12V | 12T | Triangles (3 × `u32` LE per triangle) |
//! | 14+12V+12T | 4V | Error scalars (`f32` LE, only if flag bit 0) |

use std::io::{BufRead, Write};

use glam::Vec3;

use crate::error::GeometryError;
use crate::mesh::Mesh;

/// Magic bytes identifying the AXMS format.
const MAGIC: [u8; 4] = [0x41, 0x58, 0x4D, 0x53];

/// Current format version.
const FORMAT_VERSION: u8 = 1;

/// Flag bit: per-vertex error scalars follow the triangles.
const FLAG_ERRORS: u8 = 0b0000_0001;

const HEADER_LEN: usize = 14;

/// Errors that can occur while reading or writing mesh files.
#[derive(Debug, thiserror::Error)]
pub enum MeshSerError {
    /// The data does not start with the expected magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    /// The data is shorter than its header claims.
    #[error("data truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The decoded mesh is inconsistent.
    #[error(transparent)]
    Invalid(#[from] GeometryError),
    /// An OBJ line could not be parsed.
    #[error("OBJ line {line}: {reason}")]
    Obj {
        /// One-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },
    /// Reading or writing failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Mesh {
    /// Serializes this mesh to a byte vector in the AXMS format.
    pub fn serialize(&self) -> Vec<u8> {
        let errors = self
            .errors
            .as_ref()
            .filter(|e| e.len() == self.positions.len());
        let mut buf = Vec::with_capacity(
            HEADER_LEN + 12 * self.positions.len() + 12 * self.triangles.len(),
        );
        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);
        buf.push(if errors.is_some() { FLAG_ERRORS } else { 0 });
        buf.extend_from_slice(&(self.positions.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.triangles.len() as u32).to_le_bytes());
        for p in &self.positions {
            for c in p.to_array() {
                buf.extend_from_slice(&c.to_le_bytes());
            }
        }
        for t in &self.triangles {
            for i in t {
                buf.extend_from_slice(&i.to_le_bytes());
            }
        }
        if let Some(errors) = errors {
            for e in errors {
                buf.extend_from_slice(&e.to_le_bytes());
            }
        }
        buf
    }

    /// Deserializes a mesh from a byte slice in the AXMS format.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, MeshSerError> {
        if bytes.len() < 4 || bytes[0..4] != MAGIC {
            return Err(MeshSerError::InvalidMagic);
        }
        if bytes.len() < HEADER_LEN {
            return Err(MeshSerError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let version = bytes[4];
        if version != FORMAT_VERSION {
            return Err(MeshSerError::UnsupportedVersion(version));
        }
        let has_errors = bytes[5] & FLAG_ERRORS != 0;
        let vertex_count = read_u32(bytes, 6) as usize;
        let triangle_count = read_u32(bytes, 10) as usize;

        let expected = HEADER_LEN
            + 12 * vertex_count
            + 12 * triangle_count
            + if has_errors { 4 * vertex_count } else { 0 };
        if bytes.len() < expected {
            return Err(MeshSerError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let mut offset = HEADER_LEN;
        let mut positions = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            positions.push(Vec3::new(
                read_f32(bytes, offset),
                read_f32(bytes, offset + 4),
                read_f32(bytes, offset + 8),
            ));
            offset += 12;
        }
        let mut triangles = Vec::with_capacity(triangle_count);
        for _ in 0..triangle_count {
            triangles.push([
                read_u32(bytes, offset),
                read_u32(bytes, offset + 4),
                read_u32(bytes, offset + 8),
            ]);
            offset += 12;
        }
        let errors = has_errors.then(|| {
            (0..vertex_count)
                .map(|i| read_f32(bytes, offset + 4 * i))
                .collect()
        });

        let mesh = Mesh {
            positions,
            triangles,
            errors,
        };
        mesh.validate()?;
        Ok(mesh)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(bytes, offset))
}

/// Writes `mesh` as Wavefront OBJ with one-based face indices.
pub fn write_obj<W: Write>(mesh: &Mesh, mut out: W) -> Result<(), MeshSerError> {
    writeln!(
        out,
        "# {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    )?;
    for p in &mesh.positions {
        writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
    }
    for t in &mesh.triangles {
        writeln!(out, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1)?;
    }
    out.flush()?;
    Ok(())
}

/// Reads the vertices and faces of a Wavefront OBJ stream.
///
/// Polygons are fan-triangulated; texture and normal references and all
/// other statements are ignored.
pub fn read_obj<R: BufRead>(input: R) -> Result<Mesh, MeshSerError> {
    let mut mesh = Mesh::default();
    for (n, line) in input.lines().enumerate() {
        let line = line?;
        let bad = |reason: &str| MeshSerError::Obj {
            line: n + 1,
            reason: reason.to_string(),
        };
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("v") => {
                let coords: Vec<f32> = fields
                    .take(3)
                    .map(|f| f.parse::<f32>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| bad("malformed vertex"))?;
                let [x, y, z] = <[f32; 3]>::try_from(coords).map_err(|_| bad("short vertex"))?;
                mesh.positions.push(Vec3::new(x, y, z));
            }
            Some("f") => {
                let indices: Vec<u32> = fields
                    .map(|f| {
                        f.split('/')
                            .next()
                            .and_then(|i| i.parse::<u32>().ok())
                            .filter(|&i| i > 0)
                            .map(|i| i - 1)
                    })
                    .collect::<Option<_>>()
                    .ok_or_else(|| bad("malformed face"))?;
                if indices.len() < 3 {
                    return Err(bad("face with fewer than three vertices"));
                }
                for k in 1..indices.len() - 1 {
                    mesh.triangles.push([indices[0], indices[k], indices[k + 1]]);
                }
            }
            _ => {}
        }
    }
    mesh.validate()?;
    Ok(mesh)
}
