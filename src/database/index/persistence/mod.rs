// Binary index file format
//
// Little-endian layout:
//   header: magic "DVIX", version u32, dimension u32, m u32, ef_construction u32, ef_search u32,
//           capacity u64, node_count u64, entry_point i64 (-1 = none), max_level u32, rng_state u64
//   node:   id i64, deleted u8, level u32, vector f32 x dimension,
//           then for each layer 0..=level: neighbour count u32, neighbour indices u32 x count
//   trailer: SHA-256 of everything before it


use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::IndexError;
use super::hnsw::{HnswGraph, HnswParams, Node};

pub const MAGIC: &[u8; 4] = b"DVIX";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 * 5 + 8 * 2 + 8 + 4 + 8;
const CHECKSUM_LEN: usize = 32;

/// Serialize the graph and atomically replace the file at `path`
pub(crate) fn write_graph(graph: &HnswGraph, path: &Path) -> Result<(), IndexError> {
    let bytes = encode(graph)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| IndexError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let tmp_path = temporary_path(path);
    let io_error = |source: std::io::Error| IndexError::Io {
        path: tmp_path.clone(),
        source,
    };
    let mut file = fs::File::create(&tmp_path).map_err(io_error)?;
    file.write_all(&bytes).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(
        "Wrote similarity index ({} bytes, {} nodes) to {}",
        bytes.len(),
        graph.nodes.len(),
        path.display()
    );
    Ok(())
}

/// Read and validate a graph file
pub(crate) fn read_graph(path: &Path) -> Result<HnswGraph, IndexError> {
    let bytes = fs::read(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes)
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn to_u32(value: usize, what: &str) -> Result<u32, IndexError> {
    u32::try_from(value).map_err(|_| IndexError::Corrupt(format!("{what} {value} does not fit the file format")))
}

pub(crate) fn encode(graph: &HnswGraph) -> Result<Vec<u8>, IndexError> {
    let node_size = 8 + 1 + 4 + graph.dimension * 4;
    let mut buf = Vec::with_capacity(HEADER_LEN + graph.nodes.len() * node_size + CHECKSUM_LEN);

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&to_u32(graph.dimension, "dimension")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(graph.params.m, "m")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(graph.params.ef_construction, "ef_construction")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(graph.params.ef_search, "ef_search")?.to_le_bytes());
    buf.extend_from_slice(&(graph.capacity as u64).to_le_bytes());
    buf.extend_from_slice(&(graph.nodes.len() as u64).to_le_bytes());
    let entry = graph.entry_point.map_or(-1, i64::from);
    buf.extend_from_slice(&entry.to_le_bytes());
    buf.extend_from_slice(&to_u32(graph.max_level, "max_level")?.to_le_bytes());
    buf.extend_from_slice(&graph.rng_state.to_le_bytes());

    for node in &graph.nodes {
        buf.extend_from_slice(&node.id.to_le_bytes());
        buf.push(u8::from(node.deleted));
        buf.extend_from_slice(&to_u32(node.level, "level")?.to_le_bytes());
        for value in &node.vector {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        for layer in &node.neighbors {
            buf.extend_from_slice(&to_u32(layer.len(), "neighbour count")?.to_le_bytes());
            for neighbor in layer {
                buf.extend_from_slice(&neighbor.to_le_bytes());
            }
        }
    }

    let checksum = Sha256::digest(&buf);
    buf.extend_from_slice(&checksum);
    Ok(buf)
}

/// Bounds-checked little-endian reader
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], IndexError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .ok_or_else(|| IndexError::Corrupt(format!("unexpected end of file at byte {}", self.pos)))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, IndexError> {
        Ok(self.take::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> Result<u64, IndexError> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn i64(&mut self) -> Result<i64, IndexError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn f32(&mut self) -> Result<f32, IndexError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    fn usize(&mut self) -> Result<usize, IndexError> {
        let value = self.u64()?;
        usize::try_from(value).map_err(|_| IndexError::Corrupt(format!("value {value} out of range")))
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<HnswGraph, IndexError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(IndexError::Corrupt(format!(
            "file is {} bytes, shorter than the header",
            bytes.len()
        )));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if Sha256::digest(body).as_slice() != trailer {
        return Err(IndexError::Corrupt("checksum mismatch".to_string()));
    }

    let mut reader = Reader::new(body);
    if &reader.take::<4>()? != MAGIC {
        return Err(IndexError::Corrupt("bad magic number".to_string()));
    }
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!("unsupported format version {version}")));
    }

    let dimension = reader.u32()? as usize;
    let params = HnswParams {
        m: reader.u32()? as usize,
        ef_construction: reader.u32()? as usize,
        ef_search: reader.u32()? as usize,
    };
    let capacity = reader.usize()?;
    let node_count = reader.usize()?;
    let entry = reader.i64()?;
    let max_level = reader.u32()? as usize;
    let rng_state = reader.u64()?;

    if dimension == 0 || params.m == 0 {
        return Err(IndexError::Corrupt("zero dimension or m".to_string()));
    }
    let min_node_size = 8 + 1 + 4 + dimension * 4 + 4;
    if node_count.saturating_mul(min_node_size) > reader.remaining() {
        return Err(IndexError::Corrupt(format!(
            "node count {node_count} exceeds file size"
        )));
    }

    let mut nodes = Vec::with_capacity(node_count);
    let mut id_to_node = HashMap::with_capacity(node_count);

    for index in 0..node_count {
        let id = reader.i64()?;
        let deleted = match reader.u8()? {
            0 => false,
            1 => true,
            other => return Err(IndexError::Corrupt(format!("invalid tombstone flag {other}"))),
        };
        let level = reader.u32()? as usize;
        if level > max_level {
            return Err(IndexError::Corrupt(format!(
                "node {index} level {level} above max level {max_level}"
            )));
        }

        let vector = (0..dimension)
            .map(|_| reader.f32())
            .collect::<Result<Vec<f32>, _>>()?;

        let mut neighbors = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let count = reader.u32()? as usize;
            if count.saturating_mul(4) > reader.remaining() {
                return Err(IndexError::Corrupt(format!(
                    "neighbour list of node {index} exceeds file size"
                )));
            }
            let layer = (0..count)
                .map(|_| reader.u32())
                .collect::<Result<Vec<u32>, _>>()?;
            if layer.iter().any(|&n| n as usize >= node_count) {
                return Err(IndexError::Corrupt(format!(
                    "node {index} links to a missing node"
                )));
            }
            neighbors.push(layer);
        }

        if !deleted {
            let node_index = u32::try_from(index)
                .map_err(|_| IndexError::Corrupt("too many nodes".to_string()))?;
            if id_to_node.insert(id, node_index).is_some() {
                return Err(IndexError::Corrupt(format!("duplicate live id {id}")));
            }
        }

        nodes.push(Node {
            id,
            vector,
            level,
            neighbors,
            deleted,
        });
    }

    if reader.remaining() != 0 {
        return Err(IndexError::Corrupt(format!(
            "{} trailing bytes after last node",
            reader.remaining()
        )));
    }

    let entry_point = match entry {
        -1 => None,
        value => {
            let index = u32::try_from(value)
                .ok()
                .filter(|&i| (i as usize) < node_count)
                .ok_or_else(|| IndexError::Corrupt(format!("invalid entry point {value}")))?;
            Some(index)
        }
    };
    if entry_point.is_none() && node_count > 0 {
        return Err(IndexError::Corrupt("nodes without an entry point".to_string()));
    }

    Ok(HnswGraph {
        dimension,
        params,
        capacity: capacity.max(node_count).max(1),
        nodes,
        id_to_node,
        entry_point,
        max_level,
        rng_state,
    })
}
