//! Binary container header.
//!
//! Little-endian, field by field:
//!
//! ```text
//! [4]  signature "TPBF" (finalized) or "TPBD" (dirty)
//! [4]  version major i32     [4] version minor i32
//! [8]  point-data offset i64
//! [2]  point size i16
//! [4]  compression method i32
//! [4]  tile order i32
//! [48] quantization: scale 3×f64, offset 3×f64
//! [24] z statistics: mean, variance, mode 3×f64
//!      tile set: rows u16, cols u16, extent 6×f64,
//!      density: points i64, tiles i32, valid i32, min/max/median/mean count i32,
//!               min/max/median/mean density f64
//!      per valid tile: row u16, col u16, count i32, low-res count i32, storage size i64
//! ```

use bytes::{BufMut, BytesMut};
use std::io::Read;

use crate::error::{Result, TileError};
use crate::geometry::{Extent3D, QUANTIZED_POINT_SIZE, Quantization3D};
use crate::tiling::{GridLayout, TileKey, TileOrder, TileRecord, TileSet, ZStatistics};

use super::compression::CompressionMethod;

pub const SIGNATURE: &[u8; 4] = b"TPBF";
pub const DIRTY_SIGNATURE: &[u8; 4] = b"TPBD";
pub const VERSION_MAJOR: i32 = 1;
pub const VERSION_MINOR: i32 = 12;

/// Largest grid a container may describe.
pub const MAX_GRID_TILES: u64 = 1 << 20;

const TILE_RECORD_SIZE: usize = 2 + 2 + 4 + 4 + 8;
/// Everything before the tile records.
const FIXED_HEADER_SIZE: usize = 102 + 2 + 2 + 48 + 8 + 4 * 6 + 8 * 4;

/// Container-level fields besides the tile set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaderInfo {
    pub dirty: bool,
    pub point_size: usize,
    pub compression: CompressionMethod,
    pub quantization: Quantization3D,
    pub z_statistics: ZStatistics,
}

/// A decoded header.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub info: HeaderInfo,
    pub point_data_offset: u64,
    pub tile_set: TileSet,
}

/// Serialize a header. The point-data offset is the header's own length, so
/// the header is encoded once to measure it and again with the offset set.
pub fn encode_header(info: &HeaderInfo, tile_set: &TileSet) -> Result<(BytesMut, u64)> {
    let mut buf = BytesMut::with_capacity(256 + tile_set.valid_tile_count() * TILE_RECORD_SIZE);
    write_header(&mut buf, info, tile_set, 0)?;
    let offset = buf.len() as u64;
    buf.clear();
    write_header(&mut buf, info, tile_set, offset)?;
    Ok((buf, offset))
}

fn write_header(buf: &mut BytesMut, info: &HeaderInfo, tile_set: &TileSet, offset: u64) -> Result<()> {
    let tiles = tile_set.cols() as u64 * tile_set.rows() as u64;
    if tiles > MAX_GRID_TILES {
        return Err(TileError::FatalConfiguration(format!(
            "{}x{} grid exceeds the {} tile container limit",
            tile_set.cols(),
            tile_set.rows(),
            MAX_GRID_TILES
        )));
    }
    let point_size = i16::try_from(info.point_size).map_err(|_| {
        TileError::InvalidInput(format!("point size {} does not fit the header", info.point_size))
    })?;

    buf.put_slice(if info.dirty { DIRTY_SIGNATURE } else { SIGNATURE });
    buf.put_i32_le(VERSION_MAJOR);
    buf.put_i32_le(VERSION_MINOR);
    buf.put_i64_le(offset as i64);
    buf.put_i16_le(point_size);
    buf.put_i32_le(info.compression.id());
    buf.put_i32_le(tile_set.order().id());

    for v in info.quantization.scale.iter().chain(&info.quantization.offset) {
        buf.put_f64_le(*v);
    }

    buf.put_f64_le(info.z_statistics.mean);
    buf.put_f64_le(info.z_statistics.variance);
    buf.put_f64_le(info.z_statistics.mode_approximate);

    buf.put_u16_le(tile_set.rows());
    buf.put_u16_le(tile_set.cols());
    let e = tile_set.extent();
    for v in [e.min_x, e.min_y, e.min_z, e.max_x, e.max_y, e.max_z] {
        buf.put_f64_le(v);
    }

    let d = tile_set.density();
    buf.put_i64_le(d.point_count as i64);
    buf.put_i32_le(d.tile_count as i32);
    buf.put_i32_le(d.valid_tile_count as i32);
    buf.put_i32_le(d.min_tile_count as i32);
    buf.put_i32_le(d.max_tile_count as i32);
    buf.put_i32_le(d.median_tile_count as i32);
    buf.put_i32_le(d.mean_tile_count as i32);
    buf.put_f64_le(d.min_tile_density);
    buf.put_f64_le(d.max_tile_density);
    buf.put_f64_le(d.median_tile_density);
    buf.put_f64_le(d.mean_tile_density);

    for record in tile_set.records() {
        buf.put_u16_le(record.key.row);
        buf.put_u16_le(record.key.col);
        buf.put_i32_le(record.point_count as i32);
        buf.put_i32_le(record.low_res_count as i32);
        buf.put_i64_le(record.storage_size as i64);
    }
    Ok(())
}

/// Decode and validate a header. A dirty container is rejected.
pub fn read_header<R: Read>(reader: &mut R) -> Result<ContainerHeader> {
    read_header_inner(reader).map_err(|e| match e {
        TileError::Io(io) => TileError::from_header_io(io),
        other => other,
    })
}

fn read_header_inner<R: Read>(reader: &mut R) -> Result<ContainerHeader> {
    let mut signature = [0u8; 4];
    reader.read_exact(&mut signature)?;
    if &signature == DIRTY_SIGNATURE {
        return Err(TileError::Format("container was never finalized".to_string()));
    }
    if &signature != SIGNATURE {
        return Err(TileError::Format("signature mismatch".to_string()));
    }

    let major = read_i32(reader)?;
    let minor = read_i32(reader)?;
    if major != VERSION_MAJOR || minor != VERSION_MINOR {
        return Err(TileError::Format(format!(
            "version {}.{} does not match {}.{}",
            major, minor, VERSION_MAJOR, VERSION_MINOR
        )));
    }

    let offset = read_i64(reader)?;
    let point_size = read_i16(reader)?;
    if point_size < QUANTIZED_POINT_SIZE as i16 || offset < 0 {
        return Err(TileError::Format("invalid point layout".to_string()));
    }

    let compression = CompressionMethod::from_id(read_i32(reader)?)?;
    let order = TileOrder::from_id(read_i32(reader)?)?;

    let mut q = [0f64; 6];
    for v in q.iter_mut() {
        *v = read_f64(reader)?;
    }
    let quantization = Quantization3D::new([q[0], q[1], q[2]], [q[3], q[4], q[5]])
        .map_err(|e| TileError::Format(e.to_string()))?;

    let z_statistics = ZStatistics {
        mean: read_f64(reader)?,
        variance: read_f64(reader)?,
        mode_approximate: read_f64(reader)?,
    };

    let rows = read_u16(reader)?;
    let cols = read_u16(reader)?;
    if rows == 0 || cols == 0 {
        return Err(TileError::Format("empty tile grid".to_string()));
    }
    let mut e = [0f64; 6];
    for v in e.iter_mut() {
        *v = read_f64(reader)?;
    }
    let extent = Extent3D::new(e[0], e[1], e[2], e[3], e[4], e[5]);

    let point_count = read_i64(reader)?;
    let tile_count = read_i32(reader)?;
    let valid_tile_count = read_i32(reader)?;
    for _ in 0..4 {
        read_i32(reader)?;
    }
    for _ in 0..4 {
        read_f64(reader)?;
    }
    let grid = rows as u64 * cols as u64;
    if grid > MAX_GRID_TILES {
        return Err(TileError::Format(format!("{}x{} grid is too large", cols, rows)));
    }
    if tile_count as i64 != grid as i64 || valid_tile_count < 0 || valid_tile_count > tile_count {
        return Err(TileError::Format("density block does not match the grid".to_string()));
    }
    let records_end = FIXED_HEADER_SIZE as u64 + valid_tile_count as u64 * TILE_RECORD_SIZE as u64;
    if records_end != offset as u64 {
        return Err(TileError::Format(format!(
            "{} tile records do not end at point-data offset {}",
            valid_tile_count, offset
        )));
    }

    let mut records = Vec::with_capacity(valid_tile_count as usize);
    for _ in 0..valid_tile_count {
        let row = read_u16(reader)?;
        let col = read_u16(reader)?;
        let point_count = read_i32(reader)?;
        let low_res_count = read_i32(reader)?;
        let storage_size = read_i64(reader)?;
        if point_count <= 0 || low_res_count < 0 || storage_size < 0 {
            return Err(TileError::Format(format!("invalid tile record ({}, {})", col, row)));
        }
        records.push(TileRecord {
            key: TileKey::new(col, row),
            point_count: point_count as u32,
            low_res_count: low_res_count as u32,
            storage_size: storage_size as u64,
        });
    }

    let layout = GridLayout::new(cols, rows, extent, &quantization);
    let mut tile_set = TileSet::from_records(layout, order, &records)?;
    if tile_set.point_count() != point_count as u64 {
        return Err(TileError::Format(
            "tile records disagree with the density block".to_string(),
        ));
    }
    tile_set.assign_storage(point_size as usize);

    Ok(ContainerHeader {
        info: HeaderInfo {
            dirty: false,
            point_size: point_size as usize,
            compression,
            quantization,
            z_statistics,
        },
        point_data_offset: offset as u64,
        tile_set,
    })
}

fn read_u16<R: Read>(reader: &mut R) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_i16<R: Read>(reader: &mut R) -> std::io::Result<i16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> std::io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> std::io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f64<R: Read>(reader: &mut R) -> std::io::Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (HeaderInfo, TileSet) {
        let quantization = Quantization3D::new([0.01; 3], [100.0, 200.0, 0.0]).unwrap();
        let extent = Extent3D::new(100.0, 200.0, 0.0, 130.0, 220.0, 5.0);
        let layout = GridLayout::new(3, 2, extent, &quantization);
        let mut set = TileSet::from_counts(layout, TileOrder::Tree, &[4, 0, 2, 9, 0, 1]).unwrap();
        for tile in set.records() {
            let t = set.tile_mut(tile.key).unwrap();
            t.low_res_count = 1;
            t.storage_size = (t.point_count as u64 - 1) * 12;
        }
        set.assign_storage(12);

        let info = HeaderInfo {
            dirty: false,
            point_size: 12,
            compression: CompressionMethod::None,
            quantization,
            z_statistics: ZStatistics {
                mean: 2.5,
                variance: 1.25,
                mode_approximate: 2.0,
            },
        };
        (info, set)
    }

    #[test]
    fn test_offset_is_header_length() {
        let (info, set) = sample();
        let (bytes, offset) = encode_header(&info, &set).unwrap();
        assert_eq!(bytes.len() as u64, offset);
        assert_eq!(
            offset as usize,
            FIXED_HEADER_SIZE + set.valid_tile_count() * TILE_RECORD_SIZE
        );
        assert_eq!(&bytes[..4], SIGNATURE);
        assert_eq!(i64::from_le_bytes(bytes[12..20].try_into().unwrap()) as u64, offset);
    }

    #[test]
    fn test_decode_matches_encode() {
        let (info, set) = sample();
        let (bytes, offset) = encode_header(&info, &set).unwrap();
        let header = read_header(&mut &bytes[..]).unwrap();

        assert_eq!(header.point_data_offset, offset);
        assert_eq!(header.info, info);
        assert_eq!(header.tile_set, set);
        let storage: Vec<_> = header.tile_set.valid_tiles().map(|t| t.storage_offset).collect();
        let expected: Vec<_> = set.valid_tiles().map(|t| t.storage_offset).collect();
        assert_eq!(storage, expected);
    }

    #[test]
    fn test_rejects_bad_signature() {
        let (info, set) = sample();
        let (mut bytes, _) = encode_header(&info, &set).unwrap();
        bytes[0] = b'X';
        assert!(matches!(read_header(&mut &bytes[..]), Err(TileError::Format(_))));
    }

    #[test]
    fn test_rejects_dirty_container() {
        let (mut info, set) = sample();
        info.dirty = true;
        let (bytes, _) = encode_header(&info, &set).unwrap();
        assert_eq!(&bytes[..4], DIRTY_SIGNATURE);
        assert!(matches!(read_header(&mut &bytes[..]), Err(TileError::Format(_))));
    }

    #[test]
    fn test_rejects_version_mismatch() {
        let (info, set) = sample();
        let (mut bytes, _) = encode_header(&info, &set).unwrap();
        bytes[8..12].copy_from_slice(&(VERSION_MINOR + 1).to_le_bytes());
        assert!(matches!(read_header(&mut &bytes[..]), Err(TileError::Format(_))));
    }

    #[test]
    fn test_truncated_header_is_format_error() {
        let (info, set) = sample();
        let (bytes, _) = encode_header(&info, &set).unwrap();
        for cut in [2, 30, bytes.len() - 1] {
            assert!(matches!(
                read_header(&mut &bytes[..cut]),
                Err(TileError::Format(_))
            ));
        }
    }

    #[test]
    fn test_damaged_grid_size_is_format_error() {
        let (info, set) = sample();
        let (bytes, _) = encode_header(&info, &set).unwrap();

        // huge grid with a matching tile count
        let mut huge = bytes.clone();
        huge[102..104].copy_from_slice(&46_340u16.to_le_bytes());
        huge[104..106].copy_from_slice(&46_340u16.to_le_bytes());
        huge[162..166].copy_from_slice(&(46_340i32 * 46_340).to_le_bytes());
        assert!(matches!(read_header(&mut &huge[..]), Err(TileError::Format(_))));

        // valid count that overruns the header
        let mut overrun = bytes.clone();
        overrun[102..104].copy_from_slice(&1_000u16.to_le_bytes());
        overrun[104..106].copy_from_slice(&1_000u16.to_le_bytes());
        overrun[162..166].copy_from_slice(&1_000_000i32.to_le_bytes());
        overrun[166..170].copy_from_slice(&900_000i32.to_le_bytes());
        assert!(matches!(read_header(&mut &overrun[..]), Err(TileError::Format(_))));
    }

    #[test]
    fn test_oversized_grid_is_not_written() {
        let (info, _) = sample();
        let extent = Extent3D::new(0.0, 0.0, 0.0, 1025.0, 1024.0, 1.0);
        let layout = GridLayout::new(1025, 1024, extent, &info.quantization);
        let mut counts = vec![0u32; 1025 * 1024];
        counts[0] = 1;
        let set = TileSet::from_counts(layout, TileOrder::RowMajor, &counts).unwrap();
        assert!(matches!(
            encode_header(&info, &set),
            Err(TileError::FatalConfiguration(_))
        ));
    }
}
