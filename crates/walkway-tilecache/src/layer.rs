//! Compressed heightfield layer: the per-tile intermediate the cache keeps
//! so obstacles can trigger cheap incremental rebuilds.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use std::io::Cursor;
use walkway_build::{Heightfield, NULL_AREA};
use walkway_common::{Error, Result};

/// Magic tag of a serialized layer.
pub const LAYER_MAGIC: u32 = u32::from_le_bytes(*b"WLYR");
/// Layer layout version.
pub const LAYER_VERSION: u32 = 1;

/// One walkable-floor slice of a tile.
///
/// Cells store the floor height in cell-height units and the area id;
/// [`NULL_AREA`] cells are empty.
#[derive(Debug, Clone)]
pub struct TileCacheLayer {
    /// Tile grid position.
    pub tx: i32,
    /// Tile grid position.
    pub ty: i32,
    /// Vertical layer index.
    pub tlayer: i32,
    /// World bounds of the layer.
    pub bmin: Vec3,
    /// World bounds of the layer.
    pub bmax: Vec3,
    /// Horizontal cell size.
    pub cs: f32,
    /// Vertical cell size.
    pub ch: f32,
    /// Cells along x.
    pub width: i32,
    /// Cells along z.
    pub height: i32,
    /// Floor height per cell.
    pub heights: Vec<u16>,
    /// Area id per cell.
    pub areas: Vec<u8>,
}

impl TileCacheLayer {
    /// Extracts a layer from a filtered heightfield, keeping the topmost
    /// walkable floor per column.
    pub fn from_heightfield(hf: &Heightfield, tx: i32, ty: i32, tlayer: i32) -> Self {
        let cells = (hf.width * hf.height) as usize;
        let mut layer = Self {
            tx,
            ty,
            tlayer,
            bmin: hf.bmin,
            bmax: hf.bmax,
            cs: hf.cs,
            ch: hf.ch,
            width: hf.width,
            height: hf.height,
            heights: vec![0; cells],
            areas: vec![NULL_AREA; cells],
        };
        for z in 0..hf.height {
            for x in 0..hf.width {
                let idx = (x + z * hf.width) as usize;
                for (_, span) in hf.column_spans(x, z) {
                    if span.area != NULL_AREA {
                        layer.heights[idx] = span.smax;
                        layer.areas[idx] = span.area;
                    }
                }
            }
        }
        layer
    }

    /// Reconstructs a heightfield for a rebuild pass.
    pub fn to_heightfield(&self) -> Result<Heightfield> {
        let mut hf = Heightfield::new(
            self.width,
            self.height,
            self.bmin,
            self.bmax,
            self.cs,
            self.ch,
        )?;
        for z in 0..self.height {
            for x in 0..self.width {
                let idx = (x + z * self.width) as usize;
                if self.areas[idx] == NULL_AREA {
                    continue;
                }
                let top = self.heights[idx];
                hf.add_span(x, z, top.saturating_sub(1), top, self.areas[idx], 1)?;
            }
        }
        Ok(hf)
    }

    /// Serializes the layer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(LAYER_MAGIC)?;
        buf.write_u32::<LittleEndian>(LAYER_VERSION)?;
        buf.write_i32::<LittleEndian>(self.tx)?;
        buf.write_i32::<LittleEndian>(self.ty)?;
        buf.write_i32::<LittleEndian>(self.tlayer)?;
        for a in 0..3 {
            buf.write_f32::<LittleEndian>(self.bmin[a])?;
        }
        for a in 0..3 {
            buf.write_f32::<LittleEndian>(self.bmax[a])?;
        }
        buf.write_f32::<LittleEndian>(self.cs)?;
        buf.write_f32::<LittleEndian>(self.ch)?;
        buf.write_i32::<LittleEndian>(self.width)?;
        buf.write_i32::<LittleEndian>(self.height)?;
        for &h in &self.heights {
            buf.write_u16::<LittleEndian>(h)?;
        }
        buf.extend_from_slice(&self.areas);
        Ok(buf)
    }

    /// Decodes a layer, checking the magic tag and version first.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != LAYER_MAGIC {
            return Err(Error::InvalidMesh("layer data has wrong magic".to_string()));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != LAYER_VERSION {
            return Err(Error::InvalidMesh(format!(
                "unsupported layer version {version}"
            )));
        }
        let tx = cursor.read_i32::<LittleEndian>()?;
        let ty = cursor.read_i32::<LittleEndian>()?;
        let tlayer = cursor.read_i32::<LittleEndian>()?;
        let mut bmin = Vec3::ZERO;
        let mut bmax = Vec3::ZERO;
        for a in 0..3 {
            bmin[a] = cursor.read_f32::<LittleEndian>()?;
        }
        for a in 0..3 {
            bmax[a] = cursor.read_f32::<LittleEndian>()?;
        }
        let cs = cursor.read_f32::<LittleEndian>()?;
        let ch = cursor.read_f32::<LittleEndian>()?;
        let width = cursor.read_i32::<LittleEndian>()?;
        let height = cursor.read_i32::<LittleEndian>()?;
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidMesh("layer grid is degenerate".to_string()));
        }

        let cells = (width * height) as usize;
        let mut heights = Vec::with_capacity(cells);
        for _ in 0..cells {
            heights.push(cursor.read_u16::<LittleEndian>()?);
        }
        let pos = cursor.position() as usize;
        if data.len() < pos + cells {
            return Err(Error::InvalidMesh("truncated layer data".to_string()));
        }
        let areas = data[pos..pos + cells].to_vec();

        Ok(Self {
            tx,
            ty,
            tlayer,
            bmin,
            bmax,
            cs,
            ch,
            width,
            height,
            heights,
            areas,
        })
    }
}
