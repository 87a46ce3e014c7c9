//! Triangle meshes loaded from PLY files (ascii and binary).

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use nalgebra::Point3;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum MeshError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed ply: {0}")]
    Parse(String),

    #[error("unsupported ply: {0}")]
    Format(String),
}

type Result<T> = std::result::Result<T, MeshError>;

/// Vertices plus triangulated faces, in model units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<[usize; 3]>,
}

impl Mesh {
    pub fn load_ply(path: impl AsRef<Path>) -> Result<Self> {
        read_ply(BufReader::new(File::open(path)?))
    }

    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.vertices.first()?;

        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            (lo.inf(v), hi.sup(v))
        }))
    }

    /// The eight bounding box corners, x slowest and z fastest.
    pub fn corners(&self) -> Option<[Point3<f64>; 8]> {
        let (lo, hi) = self.bounds()?;

        let mut corners = [Point3::origin(); 8];
        for (i, c) in corners.iter_mut().enumerate() {
            *c = Point3::new(
                if i & 0b100 == 0 { lo.x } else { hi.x },
                if i & 0b010 == 0 { lo.y } else { hi.y },
                if i & 0b001 == 0 { lo.z } else { hi.z },
            );
        }
        Some(corners)
    }

    /// Model origin followed by the bounding corners.
    pub fn keypoints(&self) -> Option<[Point3<f64>; 9]> {
        let corners = self.corners()?;

        let mut keypoints = [Point3::origin(); 9];
        keypoints[1..].copy_from_slice(&corners);
        Some(keypoints)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl std::str::FromStr for Scalar {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        use Scalar::*;

        Ok(match s {
            "char" | "int8" => I8,
            "uchar" | "uint8" => U8,
            "short" | "int16" => I16,
            "ushort" | "uint16" => U16,
            "int" | "int32" => I32,
            "uint" | "uint32" => U32,
            "float" | "float32" => F32,
            "double" | "float64" => F64,
            _ => return Err(MeshError::Format(format!("scalar type `{s}`"))),
        })
    }
}

#[derive(Debug)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { name: String, count: Scalar, item: Scalar },
}

#[derive(Debug)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

#[derive(Debug)]
struct Header {
    encoding: Encoding,
    elements: Vec<Element>,
}

fn parse_err(what: impl Into<String>) -> MeshError {
    MeshError::Parse(what.into())
}

fn read_header(r: &mut impl BufRead) -> Result<Header> {
    let mut line = String::new();
    r.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(parse_err("missing `ply` magic"));
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = vec![];

    loop {
        line.clear();
        if r.read_line(&mut line)? == 0 {
            return Err(parse_err("header ended without `end_header`"));
        }

        let mut words = line.split_whitespace();
        match words.next() {
            Some("end_header") => break,
            Some("comment" | "obj_info") | None => {}

            Some("format") => {
                encoding = Some(match words.next() {
                    Some("ascii") => Encoding::Ascii,
                    Some("binary_little_endian") => Encoding::BinaryLittleEndian,
                    Some("binary_big_endian") => Encoding::BinaryBigEndian,
                    other => return Err(MeshError::Format(format!("encoding {other:?}"))),
                });
            }

            Some("element") => {
                let (Some(name), Some(count)) = (words.next(), words.next()) else {
                    return Err(parse_err(format!("bad element line `{}`", line.trim())));
                };
                elements.push(Element {
                    name: name.to_string(),
                    count: count
                        .parse()
                        .map_err(|_| parse_err(format!("bad element count `{count}`")))?,
                    properties: vec![],
                });
            }

            Some("property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| parse_err("property before any element"))?;

                let words: Vec<&str> = words.collect();
                let property = match words.as_slice() {
                    ["list", count, item, name] => Property::List {
                        name: name.to_string(),
                        count: count.parse()?,
                        item: item.parse()?,
                    },
                    [ty, name] => Property::Scalar {
                        name: name.to_string(),
                        ty: ty.parse()?,
                    },
                    _ => return Err(parse_err(format!("bad property line `{}`", line.trim()))),
                };
                element.properties.push(property);
            }

            Some(other) => return Err(parse_err(format!("unknown header keyword `{other}`"))),
        }
    }

    Ok(Header {
        encoding: encoding.ok_or_else(|| parse_err("missing format line"))?,
        elements,
    })
}

trait ValueReader {
    fn value(&mut self, ty: Scalar) -> Result<f64>;
}

struct AsciiValues<I> {
    tokens: I,
}

impl<'a, I: Iterator<Item = &'a str>> ValueReader for AsciiValues<I> {
    fn value(&mut self, _: Scalar) -> Result<f64> {
        let token = self
            .tokens
            .next()
            .ok_or_else(|| parse_err("unexpected end of data"))?;
        token
            .parse()
            .map_err(|_| parse_err(format!("bad number `{token}`")))
    }
}

struct BinaryValues<R, B> {
    reader: R,
    order: std::marker::PhantomData<B>,
}

impl<R: Read, B: ByteOrder> ValueReader for BinaryValues<R, B> {
    fn value(&mut self, ty: Scalar) -> Result<f64> {
        let r = &mut self.reader;
        let v = match ty {
            Scalar::I8 => r.read_i8()? as f64,
            Scalar::U8 => r.read_u8()? as f64,
            Scalar::I16 => r.read_i16::<B>()? as f64,
            Scalar::U16 => r.read_u16::<B>()? as f64,
            Scalar::I32 => r.read_i32::<B>()? as f64,
            Scalar::U32 => r.read_u32::<B>()? as f64,
            Scalar::F32 => r.read_f32::<B>()? as f64,
            Scalar::F64 => r.read_f64::<B>()?,
        };
        Ok(v)
    }
}

fn read_body(header: &Header, values: &mut impl ValueReader) -> Result<Mesh> {
    let mut mesh = Mesh::default();
    let mut polygons: Vec<Vec<usize>> = vec![];

    for element in &header.elements {
        let is_vertex = element.name == "vertex";
        let is_face = element.name == "face";

        for _ in 0..element.count {
            let mut xyz = [0.; 3];

            for property in &element.properties {
                match property {
                    Property::Scalar { name, ty } => {
                        let v = values.value(*ty)?;
                        if is_vertex {
                            match name.as_str() {
                                "x" => xyz[0] = v,
                                "y" => xyz[1] = v,
                                "z" => xyz[2] = v,
                                _ => {}
                            }
                        }
                    }
                    Property::List { name, count, item } => {
                        let n = values.value(*count)?;
                        if n < 0. || n.fract() != 0. {
                            return Err(parse_err(format!("bad list length {n}")));
                        }
                        let list = (0..n as usize)
                            .map(|_| values.value(*item))
                            .collect::<Result<Vec<_>>>()?;

                        if is_face && matches!(name.as_str(), "vertex_indices" | "vertex_index") {
                            if let Some(bad) = list.iter().find(|i| **i < 0. || i.fract() != 0.) {
                                return Err(parse_err(format!("bad vertex index {bad}")));
                            }
                            polygons.push(list.into_iter().map(|i| i as usize).collect());
                        }
                    }
                }
            }

            if is_vertex {
                mesh.vertices.push(Point3::from(xyz));
            }
        }
    }

    if mesh.vertices.is_empty() {
        return Err(parse_err("no vertices"));
    }

    for polygon in polygons {
        if let Some(&bad) = polygon.iter().find(|&&i| i >= mesh.vertices.len()) {
            return Err(parse_err(format!(
                "face references vertex {bad} of {}",
                mesh.vertices.len()
            )));
        }

        // fan triangulation
        for i in 2..polygon.len() {
            mesh.faces.push([polygon[0], polygon[i - 1], polygon[i]]);
        }
    }

    Ok(mesh)
}

pub fn read_ply(mut r: impl BufRead) -> Result<Mesh> {
    let header = read_header(&mut r)?;

    match header.encoding {
        Encoding::Ascii => {
            let mut body = String::new();
            r.read_to_string(&mut body)?;
            read_body(
                &header,
                &mut AsciiValues {
                    tokens: body.split_whitespace(),
                },
            )
        }
        Encoding::BinaryLittleEndian => read_body(
            &header,
            &mut BinaryValues::<_, LittleEndian> {
                reader: r,
                order: Default::default(),
            },
        ),
        Encoding::BinaryBigEndian => read_body(
            &header,
            &mut BinaryValues::<_, BigEndian> {
                reader: r,
                order: Default::default(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    const CUBE_HALF: &str = "ply
format ascii 1.0
comment two faces of a box
element vertex 4
property float x
property float y
property float z
property uchar red
element face 1
property list uchar int vertex_indices
end_header
-0.5 -1 0 255
0.5 -1 0 255
0.5 1 2 255
-0.5 1 2 255
4 0 1 2 3
";

    #[test]
    fn reads_ascii_and_triangulates_quads() {
        let mesh = read_ply(Cursor::new(CUBE_HALF)).unwrap();

        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.vertices[2], Point3::new(0.5, 1., 2.));
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn reads_binary_little_endian() {
        let mut data = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\nproperty float x\nproperty float y\nproperty float z\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n".to_vec();
        for v in [[0f32, 0., 0.], [1., 0., 0.], [0., 1., 0.5]] {
            for c in v {
                data.write_f32::<LittleEndian>(c).unwrap();
            }
        }
        data.write_u8(3).unwrap();
        for i in [0, 1, 2] {
            data.write_i32::<LittleEndian>(i).unwrap();
        }

        let mesh = read_ply(Cursor::new(data)).unwrap();
        assert_eq!(mesh.vertices[2], Point3::new(0., 1., 0.5));
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
    }

    #[test]
    fn rejects_out_of_range_faces() {
        for face in ["3 0 1 9", "3 -1 1 2", "3 0 1.5 2"] {
            let text = CUBE_HALF.replace("4 0 1 2 3", face);
            assert!(
                matches!(read_ply(Cursor::new(text)), Err(MeshError::Parse(_))),
                "{face}"
            );
        }
    }

    #[test]
    fn rejects_truncated_and_unknown_files() {
        assert!(read_ply(Cursor::new("obj\n")).is_err());

        let truncated = CUBE_HALF.replace("4 0 1 2 3\n", "");
        assert!(read_ply(Cursor::new(truncated)).is_err());

        let mut odd = Vec::new();
        writeln!(odd, "ply\nformat ascii 1.0\nelement vertex 1\nproperty half x\nend_header").unwrap();
        assert!(matches!(read_ply(Cursor::new(odd)), Err(MeshError::Format(_))));
    }

    #[test]
    fn corners_and_keypoints_follow_bounds() {
        let mesh = read_ply(Cursor::new(CUBE_HALF)).unwrap();
        let (lo, hi) = mesh.bounds().unwrap();
        assert_eq!(lo, Point3::new(-0.5, -1., 0.));
        assert_eq!(hi, Point3::new(0.5, 1., 2.));

        let corners = mesh.corners().unwrap();
        assert_eq!(corners[0], lo);
        assert_eq!(corners[1], Point3::new(-0.5, -1., 2.));
        assert_eq!(corners[4], Point3::new(0.5, -1., 0.));
        assert_eq!(corners[7], hi);

        let keypoints = mesh.keypoints().unwrap();
        assert_eq!(keypoints[0], Point3::origin());
        assert_eq!(&keypoints[1..], &corners[..]);
    }
}
