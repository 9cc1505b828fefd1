//! Persisted network image.
//!
//! Layout: 8-byte magic, `u32` version, then chunks of
//! `tag [u8; 4] | len u32 | uncompressed_len u32 | lz4 block`.
//! Chunks: `CFG0` config JSON, `PRNG` random state, `NETJ` network record
//! JSON. Unknown chunks are skipped. Input without the magic is read as a
//! plain JSON network record, which is what `save_to_file_readable` writes.
//!
//! Activation history and fire observers are never persisted.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Millivolts, NetworkConfig};
use crate::error::{NetworkError, Result};
use crate::network::{Cell, CellId, Network, Synapse, SynapseId};
use crate::prng::Prng;

pub const MAGIC: &[u8; 8] = b"PLEXUS01";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

/// Sink that only counts bytes; used to size an image without keeping it.
pub struct CountingWriter {
    written: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self { written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Default for CountingWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

/// Write an LZ4 chunk preceded by the uncompressed length.
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

/// Read the body of a chunk whose header was just consumed.
pub fn read_chunk_lz4<R: Read>(r: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut take = r.take(u64::from(len));
    let uncompressed_len = read_u32_le(&mut take)? as usize;
    let mut compressed = Vec::with_capacity((len as usize).saturating_sub(4));
    take.read_to_end(&mut compressed)?;
    if compressed.len() + 4 != len as usize {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated chunk",
        ));
    }
    decompress_lz4(&compressed, uncompressed_len)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CellRecord {
    id: CellId,
    voltage: Millivolts,
    #[serde(default)]
    immortal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    axons: Vec<SynapseId>,
    dendrites: Vec<SynapseId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SynapseRecord {
    id: SynapseId,
    millivolts: Millivolts,
    from: CellId,
    to: CellId,
}

/// The persisted shape of a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NetworkRecord {
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    generation: u64,
    cells: Vec<CellRecord>,
    synapses: Vec<SynapseRecord>,
}

impl From<&Network> for NetworkRecord {
    fn from(net: &Network) -> Self {
        Self {
            disabled: net.disabled,
            generation: net.generation,
            cells: net
                .cells
                .values()
                .map(|c| CellRecord {
                    id: c.id,
                    voltage: c.voltage,
                    immortal: c.immortal,
                    tag: c.tag.clone(),
                    axons: c.axons.iter().copied().collect(),
                    dendrites: c.dendrites.iter().copied().collect(),
                })
                .collect(),
            synapses: net
                .synapses
                .values()
                .map(|s| SynapseRecord {
                    id: s.id,
                    millivolts: s.millivolts,
                    from: s.from,
                    to: s.to,
                })
                .collect(),
        }
    }
}

impl NetworkRecord {
    fn into_network(self, cfg: NetworkConfig, rng_state: Option<u64>) -> Result<Network> {
        let mut net = Network::from_config(cfg);
        if let Some(state) = rng_state {
            net.rng = Prng::from_state(state);
        }
        net.disabled = self.disabled;
        net.generation = self.generation;
        for c in self.cells {
            let mut cell = Cell::new(c.id, c.voltage);
            cell.immortal = c.immortal;
            cell.tag = c.tag;
            cell.axons = c.axons.into_iter().collect();
            cell.dendrites = c.dendrites.into_iter().collect();
            net.cells.insert(cell.id, cell);
        }
        for s in self.synapses {
            net.synapses
                .insert(s.id, Synapse::new(s.id, s.from, s.to, s.millivolts));
        }
        net.verify_integrity()?;
        Ok(net)
    }
}

impl Network {
    /// Write a versioned, chunked network image.
    pub fn save_image_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        write_u32_le(w, VERSION_CURRENT)?;

        write_chunk_lz4(w, *b"CFG0", &serde_json::to_vec(&self.cfg)?)?;
        let mut rng = Vec::with_capacity(8);
        write_u64_le(&mut rng, self.rng.state())?;
        write_chunk_lz4(w, *b"PRNG", &rng)?;
        write_chunk_lz4(w, *b"NETJ", &serde_json::to_vec(&NetworkRecord::from(self))?)?;
        Ok(())
    }

    /// Load an image written by [`Network::save_image_to`], or a plain JSON
    /// network record. The result must pass the integrity check.
    pub fn load_image_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes)?;
        if !bytes.starts_with(MAGIC) {
            let record: NetworkRecord = serde_json::from_slice(&bytes)?;
            return record.into_network(NetworkConfig::default(), None);
        }

        let mut cursor = io::Cursor::new(&bytes[MAGIC.len()..]);
        let version = read_u32_le(&mut cursor)?;
        if version != VERSION_CURRENT {
            return Err(NetworkError::BadImage("unsupported network image version"));
        }

        let mut cfg: Option<NetworkConfig> = None;
        let mut rng_state: Option<u64> = None;
        let mut record: Option<NetworkRecord> = None;

        loop {
            let (tag, len) = match read_chunk_header(&mut cursor) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let payload = read_chunk_lz4(&mut cursor, len)?;
            match &tag {
                b"CFG0" => cfg = Some(serde_json::from_slice(&payload)?),
                b"PRNG" => rng_state = Some(read_u64_le(&mut payload.as_slice())?),
                b"NETJ" => record = Some(serde_json::from_slice(&payload)?),
                _ => warn!(tag = ?String::from_utf8_lossy(&tag), "skipping unknown image chunk"),
            }
        }

        let record = record.ok_or(NetworkError::BadImage("missing NETJ chunk"))?;
        let cfg = cfg.unwrap_or_default();
        cfg.validate().map_err(NetworkError::Config)?;
        record.into_network(cfg, rng_state)
    }

    /// Serialized image size in bytes.
    pub fn image_size_bytes(&self) -> Result<usize> {
        let mut counter = CountingWriter::new();
        self.save_image_to(&mut counter)?;
        Ok(counter.written())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path)?);
        self.save_image_to(&mut w)?;
        w.flush()?;
        info!(path = %path.display(), totals = %self.totals(), "saved network");
        Ok(())
    }

    /// Pretty JSON network record, loadable by `load_from_file`.
    pub fn save_to_file_readable(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut w, &NetworkRecord::from(self))?;
        w.flush()?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut r = BufReader::new(File::open(path)?);
        let net = Self::load_image_from(&mut r)?;
        info!(path = %path.display(), totals = %net.totals(), "loaded network");
        Ok(net)
    }
}
