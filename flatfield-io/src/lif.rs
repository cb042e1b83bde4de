//! Leica Image File (LIF) container reader.
//!
//! A LIF file is a sequence of blocks. The first block holds the XML
//! description of every element in the project; each following block
//! holds the raw pixel memory of one element, located by its memory block
//! identifier. Every element that carries an image description is exposed
//! as a [`LifImage`] implementing [`Tilescan`].
//!
//! Only 8-bit channels with contiguous `Y x X` planes are supported.

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use crate::reader::MappedFileReader;
use crate::{Error, Result};
use flatfield_core::{Scale, Tilescan, TilescanInfo};
use ndarray::Array2;
use roxmltree::{Document, Node};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Block magic preceding every LIF block.
const BLOCK_MAGIC: u32 = 0x70;
/// Marker byte separating the fields of a block header.
const FIELD_MARKER: u8 = 0x2A;

const DIM_X: u32 = 1;
const DIM_Y: u32 = 2;
const DIM_Z: u32 = 3;
const DIM_T: u32 = 4;
const DIM_M: u32 = 10;

/// Bytes shared between a container and the images cut from it.
pub type SharedBytes = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// Little-endian cursor over the container bytes.
struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::InvalidFormat(format!(
                "truncated block at byte {}: need {len} bytes, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn magic(&mut self) -> Result<()> {
        let magic = self.u32()?;
        if magic != BLOCK_MAGIC {
            return Err(Error::InvalidFormat(format!(
                "expected block magic 0x{BLOCK_MAGIC:X} at byte {}, found 0x{magic:X}",
                self.pos - 4
            )));
        }
        Ok(())
    }

    fn marker(&mut self) -> Result<()> {
        let marker = self.u8()?;
        if marker != FIELD_MARKER {
            return Err(Error::InvalidFormat(format!(
                "expected field marker 0x{FIELD_MARKER:X} at byte {}, found 0x{marker:X}",
                self.pos - 1
            )));
        }
        Ok(())
    }

    /// Reads a `u32` character count followed by that many UTF-16LE units.
    fn utf16(&mut self) -> Result<String> {
        let chars = self.u32()? as usize;
        let bytes = self.take(chars * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|e| Error::InvalidFormat(format!("invalid UTF-16 text: {e}")))
    }
}

/// Location of one memory block inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemoryBlock {
    offset: usize,
    size: usize,
}

/// One dimension entry of an image description.
#[derive(Debug, Clone, Copy)]
struct Dimension {
    len: usize,
    bytes_inc: usize,
    length_um: f64,
}

impl Dimension {
    fn unit() -> Self {
        Self {
            len: 1,
            bytes_inc: 0,
            length_um: 0.0,
        }
    }

    /// Voxels per micrometre; 1.0 for singleton or unmeasured axes.
    fn scale(&self) -> f64 {
        if self.len > 1 && self.length_um != 0.0 {
            (self.len - 1) as f64 / self.length_um.abs()
        } else {
            1.0
        }
    }
}

/// Byte layout of an image inside its memory block.
#[derive(Debug, Clone)]
struct FrameLayout {
    base: usize,
    channel_offsets: Vec<usize>,
    z_inc: usize,
    t_inc: usize,
    m_inc: usize,
    nt: usize,
}

/// An image of a LIF container.
pub struct LifImage {
    info: TilescanInfo,
    layout: FrameLayout,
    bytes: SharedBytes,
}

impl std::fmt::Debug for LifImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifImage")
            .field("info", &self.info)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl LifImage {
    /// Number of timepoints.
    #[must_use]
    pub fn timepoints(&self) -> usize {
        self.layout.nt
    }

    fn plane_len(&self) -> usize {
        self.info.dims.0 * self.info.dims.1
    }

    /// In-range indices stay within the extent checked by `parse_image`.
    fn plane_offset(&self, z: usize, t: usize, c: usize, m: usize) -> usize {
        let layout = &self.layout;
        layout.base
            + layout.channel_offsets[c]
            + z * layout.z_inc
            + t * layout.t_inc
            + m * layout.m_inc
    }
}

impl Tilescan for LifImage {
    fn info(&self) -> &TilescanInfo {
        &self.info
    }

    fn frame(&self, z: usize, t: usize, c: usize, m: usize) -> flatfield_core::Result<Array2<u8>> {
        let checks = [
            ("Z", z, self.info.nz),
            ("T", t, self.layout.nt),
            ("C", c, self.info.channels),
            ("M", m, self.info.n_mosaic),
        ];
        for (axis, index, len) in checks {
            if index >= len {
                return Err(flatfield_core::Error::IndexOutOfRange { axis, index, len });
            }
        }
        let offset = self.plane_offset(z, t, c, m);
        let bytes: &[u8] = (*self.bytes).as_ref();
        let plane = bytes
            .get(offset..offset + self.plane_len())
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "plane (z={z}, t={t}, c={c}, m={m}) of '{}' lies outside the file",
                    self.info.name
                ))
            })?;
        Array2::from_shape_vec(self.info.dims, plane.to_vec())
            .map_err(|e| Error::InvalidFormat(e.to_string()).into())
    }
}

/// A parsed LIF container.
pub struct LifFile {
    images: Vec<LifImage>,
    version: u32,
}

impl std::fmt::Debug for LifFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifFile")
            .field("version", &self.version)
            .field("images", &self.images)
            .finish()
    }
}

impl LifFile {
    /// Memory-maps and parses the container at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or is not a valid
    /// 8-bit LIF container.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(&path)?;
        log::debug!(
            "Parsing LIF container {} ({} bytes)",
            reader.path().display(),
            reader.len()
        );
        let bytes: SharedBytes = reader.shared();
        Self::from_bytes(&bytes)
    }

    /// Parses a container held in `bytes`.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid 8-bit LIF container.
    pub fn from_bytes(bytes: &SharedBytes) -> Result<Self> {
        let data: &[u8] = (**bytes).as_ref();
        let mut cursor = ByteCursor::new(data);

        cursor.magic()?;
        let _header_len = cursor.u32()?;
        cursor.marker()?;
        let xml = cursor.utf16()?;

        let doc = Document::parse(&xml)?;
        let root = doc.root_element();
        let version = match root.attribute("Version") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::InvalidFormat(format!("invalid container version '{v}'")))?,
            None => 1,
        };

        let mut blocks = HashMap::new();
        while cursor.remaining() > 0 {
            cursor.magic()?;
            let _block_len = cursor.u32()?;
            cursor.marker()?;
            let size = if version == 1 {
                u64::from(cursor.u32()?)
            } else {
                cursor.u64()?
            };
            cursor.marker()?;
            let id = cursor.utf16()?;
            let size = usize::try_from(size)
                .map_err(|_| Error::InvalidFormat(format!("memory block '{id}' too large")))?;
            let offset = cursor.pos;
            cursor.take(size)?;
            blocks.insert(id, MemoryBlock { offset, size });
        }

        let mut images = Vec::new();
        for element in root.descendants().filter(|n| n.has_tag_name("Element")) {
            let Some(description) = image_description(element) else {
                continue;
            };
            let name = element.attribute("Name").unwrap_or_default().to_string();
            let block = memory_block(element, &blocks, &name)?;
            if block.size == 0 {
                log::debug!("Skipping image '{name}' with empty memory block");
                continue;
            }
            images.push(parse_image(name, description, block, bytes)?);
        }
        log::debug!(
            "LIF container version {version}: {} blocks, {} images",
            blocks.len(),
            images.len()
        );

        Ok(Self { images, version })
    }

    /// Images in document order.
    #[must_use]
    pub fn images(&self) -> &[LifImage] {
        &self.images
    }

    /// Consumes the container, returning its images.
    #[must_use]
    pub fn into_images(self) -> Vec<LifImage> {
        self.images
    }

    /// Container format version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

/// `Element/Data/Image/ImageDescription`, if the element is an image.
fn image_description<'a, 'input>(element: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    let data = child(element, "Data")?;
    let image = child(data, "Image")?;
    child(image, "ImageDescription")
}

fn memory_block(
    element: Node<'_, '_>,
    blocks: &HashMap<String, MemoryBlock>,
    name: &str,
) -> Result<MemoryBlock> {
    let memory = child(element, "Memory")
        .ok_or_else(|| Error::InvalidFormat(format!("image '{name}' has no Memory element")))?;
    let id = memory
        .attribute("MemoryBlockID")
        .ok_or_else(|| Error::InvalidFormat(format!("image '{name}' has no MemoryBlockID")))?;
    blocks
        .get(id)
        .copied()
        .ok_or_else(|| Error::InvalidFormat(format!("memory block '{id}' of '{name}' not found")))
}

fn attr<T: std::str::FromStr>(node: Node<'_, '_>, name: &str) -> Result<T> {
    let raw = node.attribute(name).ok_or_else(|| {
        Error::InvalidFormat(format!("<{}> lacks attribute {name}", node.tag_name().name()))
    })?;
    raw.trim().parse().map_err(|_| {
        Error::InvalidFormat(format!(
            "<{}> attribute {name}='{raw}' is not valid",
            node.tag_name().name()
        ))
    })
}

fn parse_dimension(node: Node<'_, '_>) -> Result<(u32, Dimension)> {
    let id: u32 = attr(node, "DimID")?;
    let len: usize = attr(node, "NumberOfElements")?;
    let bytes_inc: usize = attr(node, "BytesInc")?;
    let length: f64 = node
        .attribute("Length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0.0);
    let length_um = match node.attribute("Unit").map(str::trim) {
        Some("m") => length * 1e6,
        _ => length,
    };
    Ok((
        id,
        Dimension {
            len,
            bytes_inc,
            length_um,
        },
    ))
}

fn parse_image(
    name: String,
    description: Node<'_, '_>,
    block: MemoryBlock,
    bytes: &SharedBytes,
) -> Result<LifImage> {
    let mut channel_offsets = Vec::new();
    if let Some(channels) = child(description, "Channels") {
        for channel in channels
            .children()
            .filter(|n| n.has_tag_name("ChannelDescription"))
        {
            let resolution: u32 = attr(channel, "Resolution")?;
            if resolution != 8 {
                return Err(Error::UnsupportedPixelType(format!(
                    "image '{name}' has {resolution}-bit channels, only 8-bit is supported"
                )));
            }
            channel_offsets.push(attr::<usize>(channel, "BytesInc")?);
        }
    }
    if channel_offsets.is_empty() {
        return Err(Error::InvalidFormat(format!("image '{name}' has no channels")));
    }

    let mut dims = HashMap::new();
    if let Some(dimensions) = child(description, "Dimensions") {
        for node in dimensions
            .children()
            .filter(|n| n.has_tag_name("DimensionDescription"))
        {
            let (id, dim) = parse_dimension(node)?;
            dims.insert(id, dim);
        }
    }
    let get = |id: u32| dims.get(&id).copied().unwrap_or_else(Dimension::unit);
    let (x_dim, y_dim) = (get(DIM_X), get(DIM_Y));
    let (z_dim, t_dim, m_dim) = (get(DIM_Z), get(DIM_T), get(DIM_M));

    if !dims.contains_key(&DIM_X) || !dims.contains_key(&DIM_Y) {
        return Err(Error::InvalidFormat(format!(
            "image '{name}' lacks an X or Y dimension"
        )));
    }
    if x_dim.bytes_inc != 1 || y_dim.bytes_inc != x_dim.len {
        return Err(Error::InvalidFormat(format!(
            "image '{name}' planes are not contiguous (X inc {}, Y inc {})",
            x_dim.bytes_inc, y_dim.bytes_inc
        )));
    }

    let info = TilescanInfo {
        name,
        dims: (y_dim.len, x_dim.len),
        nz: z_dim.len,
        channels: channel_offsets.len(),
        n_mosaic: m_dim.len,
        scale: Scale::new(x_dim.scale(), y_dim.scale(), z_dim.scale()),
    };
    let layout = FrameLayout {
        base: block.offset,
        channel_offsets,
        z_inc: z_dim.bytes_inc,
        t_inc: t_dim.bytes_inc,
        m_inc: m_dim.bytes_inc,
        nt: t_dim.len,
    };

    let last_plane_end = image_extent(&info, &layout).ok_or_else(|| {
        Error::InvalidFormat(format!(
            "image '{}' dimensions overflow the address space",
            info.name
        ))
    })?;
    if last_plane_end > block.size {
        return Err(Error::InvalidFormat(format!(
            "image '{}' needs {last_plane_end} bytes but its memory block holds {}",
            info.name, block.size
        )));
    }

    Ok(LifImage {
        info,
        layout,
        bytes: Arc::clone(bytes),
    })
}

/// End of the furthest plane relative to the block start, or `None` on
/// overflow.
fn image_extent(info: &TilescanInfo, layout: &FrameLayout) -> Option<usize> {
    let span = |count: usize, inc: usize| count.saturating_sub(1).checked_mul(inc);
    let plane_len = info.dims.0.checked_mul(info.dims.1)?;
    layout
        .channel_offsets
        .iter()
        .max()
        .copied()
        .unwrap_or(0)
        .checked_add(span(info.nz, layout.z_inc)?)?
        .checked_add(span(layout.nt, layout.t_inc)?)?
        .checked_add(span(info.n_mosaic, layout.m_inc)?)?
        .checked_add(plane_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(text: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(text.encode_utf16().count() as u32).to_le_bytes());
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    /// Version 1 containers store block sizes as u32, later ones as u64.
    fn container(xml: &str, blocks: &[(&str, Vec<u8>)]) -> SharedBytes {
        let version = if xml.contains(r#"Version="1""#) { 1 } else { 2 };
        let mut out = Vec::new();
        let header = utf16(xml);
        out.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
        out.extend_from_slice(&(header.len() as u32 + 1).to_le_bytes());
        out.push(FIELD_MARKER);
        out.extend_from_slice(&header);
        for (id, data) in blocks {
            out.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.push(FIELD_MARKER);
            if version == 1 {
                out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            } else {
                out.extend_from_slice(&(data.len() as u64).to_le_bytes());
            }
            out.push(FIELD_MARKER);
            out.extend_from_slice(&utf16(id));
            out.extend_from_slice(data);
        }
        Arc::new(out)
    }

    const XML: &str = r#"<LMSDataContainerHeader Version="2">
  <Element Name="Project">
    <Data><Experiment/></Data>
    <Memory Size="0" MemoryBlockID="MemBlock_0"/>
    <Children>
      <Element Name="TileScan 1">
        <Data>
          <Image>
            <ImageDescription>
              <Channels>
                <ChannelDescription Resolution="8" BytesInc="0"/>
              </Channels>
              <Dimensions>
                <DimensionDescription DimID="1" NumberOfElements="3" Length="4e-06" Unit="m" BytesInc="1"/>
                <DimensionDescription DimID="2" NumberOfElements="2" Length="2e-06" Unit="m" BytesInc="3"/>
                <DimensionDescription DimID="3" NumberOfElements="4" Length="3e-06" Unit="m" BytesInc="6"/>
                <DimensionDescription DimID="10" NumberOfElements="2" Length="0" Unit="" BytesInc="24"/>
              </Dimensions>
            </ImageDescription>
          </Image>
        </Data>
        <Memory Size="48" MemoryBlockID="MemBlock_1"/>
      </Element>
    </Children>
  </Element>
</LMSDataContainerHeader>"#;

    #[test]
    fn test_parse_single_image() {
        let data: Vec<u8> = (0..48).collect();
        let lif = LifFile::from_bytes(&container(
            XML,
            &[("MemBlock_0", Vec::new()), ("MemBlock_1", data)],
        ))
        .unwrap();
        assert_eq!(lif.version(), 2);
        assert_eq!(lif.images().len(), 1);

        let image = &lif.images()[0];
        let info = image.info();
        assert_eq!(info.name, "TileScan 1");
        assert_eq!(info.dims, (2, 3));
        assert_eq!(info.nz, 4);
        assert_eq!(info.channels, 1);
        assert_eq!(info.n_mosaic, 2);
        assert_eq!(image.timepoints(), 1);
        assert!((info.scale.x - 0.5).abs() < 1e-12);
        assert!((info.scale.y - 0.5).abs() < 1e-12);
        assert!((info.scale.z - 1.0).abs() < 1e-12);

        // tile 1, slice 2 starts at 24 + 12
        let frame = image.frame(2, 0, 0, 1).unwrap();
        assert_eq!(frame.as_slice().unwrap(), &[36, 37, 38, 39, 40, 41]);
        assert!(image.frame(4, 0, 0, 0).is_err());
    }

    #[test]
    fn test_bad_magic() {
        let bytes: SharedBytes = Arc::new(vec![0u8; 16]);
        let err = LifFile::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_truncated_memory_block() {
        let lif = LifFile::from_bytes(&container(
            XML,
            &[("MemBlock_0", Vec::new()), ("MemBlock_1", vec![0; 20])],
        ));
        assert!(matches!(lif, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_sixteen_bit_rejected() {
        let xml = XML.replace("Resolution=\"8\"", "Resolution=\"16\"");
        let lif = LifFile::from_bytes(&container(
            &xml,
            &[("MemBlock_0", Vec::new()), ("MemBlock_1", vec![0; 48])],
        ));
        assert!(matches!(lif, Err(Error::UnsupportedPixelType(_))));
    }

    #[test]
    fn test_version_one_block_sizes() {
        let xml = XML.replace(r#"Version="2""#, r#"Version="1""#);
        let data: Vec<u8> = (0..48).collect();
        let lif = LifFile::from_bytes(&container(
            &xml,
            &[("MemBlock_0", Vec::new()), ("MemBlock_1", data)],
        ))
        .unwrap();
        assert_eq!(lif.version(), 1);
        assert_eq!(lif.images().len(), 1);

        let frame = lif.images()[0].frame(1, 0, 0, 0).unwrap();
        assert_eq!(frame.as_slice().unwrap(), &[6, 7, 8, 9, 10, 11]);
        let frame = lif.images()[0].frame(3, 0, 0, 1).unwrap();
        assert_eq!(frame.as_slice().unwrap(), &[42, 43, 44, 45, 46, 47]);
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let xml = XML
            .replace(
                r#"DimID="1" NumberOfElements="3""#,
                r#"DimID="1" NumberOfElements="4294967296""#,
            )
            .replace(
                r#"DimID="2" NumberOfElements="2" Length="2e-06" Unit="m" BytesInc="3""#,
                r#"DimID="2" NumberOfElements="4294967296" Length="2e-06" Unit="m" BytesInc="4294967296""#,
            )
            .replace(r#"Memory Size="48""#, r#"Memory Size="4""#);
        let lif = LifFile::from_bytes(&container(
            &xml,
            &[("MemBlock_0", Vec::new()), ("MemBlock_1", vec![0; 4])],
        ));
        assert!(matches!(lif, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_overflowing_increments_rejected() {
        let xml = XML.replace(
            r#"NumberOfElements="2" Length="0" Unit="" BytesInc="24""#,
            &format!(r#"NumberOfElements="3" Length="0" Unit="" BytesInc="{}""#, usize::MAX / 2 + 1),
        );
        let lif = LifFile::from_bytes(&container(
            &xml,
            &[("MemBlock_0", Vec::new()), ("MemBlock_1", vec![0; 48])],
        ));
        assert!(matches!(lif, Err(Error::InvalidFormat(_))));
    }
}
