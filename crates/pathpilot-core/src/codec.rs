use crate::matrix::Matrix;
use crate::nn::{Dense, Network, NetworkError, Topology};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use std::{error::Error, fmt, fs};

/// Binary model file format.
///
/// Raw layout: for each layer in order a weight block, then for each layer a bias
/// block. A block is `[u64 LE element count][count × f32 LE]`. Weights are stored
/// row-major (`w[j * out + i]`).
///
/// Versioned layout: `MAGIC` and a `u32 LE` version, followed by the raw layout.
/// Readers accept both; raw files written by older tools stay loadable.
pub const MAGIC: [u8; 8] = *b"PPILOTNN";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelFormat {
    #[default]
    Versioned,
    Raw,
}

#[derive(Debug)]
pub enum CodecError {
    Io { path: PathBuf, source: io::Error },
    /// Failure of the underlying reader or writer outside of a named file.
    Stream(io::Error),
    UnsupportedVersion(u32),
    Truncated { offset: usize, needed: usize },
    LengthMismatch { block: usize, expected: usize, actual: u64 },
    TrailingBytes(usize),
    /// Block count or sizes don't describe a chain of dense layers.
    Malformed(String),
    Network(NetworkError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            CodecError::Stream(e) => write!(f, "model stream: {e}"),
            CodecError::UnsupportedVersion(v) => {
                write!(f, "unsupported model format version {v} (expected {FORMAT_VERSION})")
            }
            CodecError::Truncated { offset, needed } => {
                write!(f, "model data truncated at byte {offset}: needed {needed} more bytes")
            }
            CodecError::LengthMismatch {
                block,
                expected,
                actual,
            } => write!(f, "block {block} holds {actual} values, expected {expected}"),
            CodecError::TrailingBytes(n) => write!(f, "{n} unexpected bytes after model data"),
            CodecError::Malformed(msg) => write!(f, "malformed model: {msg}"),
            CodecError::Network(e) => write!(f, "{e}"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CodecError::Io { source, .. } => Some(source),
            CodecError::Stream(e) => Some(e),
            CodecError::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NetworkError> for CodecError {
    fn from(e: NetworkError) -> Self {
        CodecError::Network(e)
    }
}

/// Serialize `network` into `writer`.
pub fn write_model<W: Write>(
    writer: &mut W,
    network: &Network,
    format: ModelFormat,
) -> io::Result<()> {
    if format == ModelFormat::Versioned {
        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    }
    for layer in network.layers() {
        write_block(writer, layer.weights.as_slice())?;
    }
    for layer in network.layers() {
        write_block(writer, &layer.bias)?;
    }
    Ok(())
}

fn write_block<W: Write>(writer: &mut W, values: &[f32]) -> io::Result<()> {
    writer.write_u64::<LittleEndian>(values.len() as u64)?;
    for &v in values {
        writer.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn encode(network: &Network, format: ModelFormat) -> Result<Vec<u8>, CodecError> {
    let blocks = 2 * network.layers().len();
    let mut out = Vec::with_capacity(HEADER_LEN + blocks * 8 + network.parameter_count() * 4);
    write_model(&mut out, network, format).map_err(CodecError::Stream)?;
    Ok(out)
}

/// Decode a model for a known topology. Every block length must match exactly.
pub fn decode(bytes: &[u8], topology: &Topology) -> Result<Network, CodecError> {
    decode_with_format(bytes, topology).map(|(net, _)| net)
}

pub fn decode_with_format(
    bytes: &[u8],
    topology: &Topology,
) -> Result<(Network, ModelFormat), CodecError> {
    let (format, mut r) = open(bytes)?;

    let mut weights = Vec::with_capacity(topology.layer_count());
    for (k, (inputs, outputs)) in topology.layer_shapes().enumerate() {
        let values = r.block(k, Some(inputs * outputs))?;
        let m = Matrix::from_vec(inputs, outputs, values)
            .ok_or_else(|| CodecError::Malformed(format!("weight block {k} has wrong shape")))?;
        weights.push(m);
    }
    let mut layers = Vec::with_capacity(weights.len());
    for (k, w) in weights.into_iter().enumerate() {
        let bias = r.block(topology.layer_count() + k, Some(w.cols()))?;
        layers.push(Dense {
            weights: w,
            bias,
            activation: topology.activation(k),
        });
    }
    r.finish()?;

    Ok((Network::from_layers(layers)?, format))
}

/// Shape of a model file, recovered from its block lengths alone.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSummary {
    pub format: ModelFormat,
    pub topology: Topology,
    pub parameter_count: usize,
}

/// Infer the topology of an encoded model without knowing it in advance.
pub fn inspect(bytes: &[u8]) -> Result<ModelSummary, CodecError> {
    let (format, mut r) = open(bytes)?;
    let mut lengths = Vec::new();
    let mut index = 0;
    while !r.at_end() {
        lengths.push(r.block(index, None)?.len());
        index += 1;
    }
    if lengths.is_empty() || lengths.len() % 2 != 0 {
        return Err(CodecError::Malformed(format!(
            "expected an even, non-zero number of blocks, found {}",
            lengths.len()
        )));
    }
    let (weight_lens, bias_lens) = lengths.split_at(lengths.len() / 2);
    let mut sizes = Vec::with_capacity(bias_lens.len() + 1);
    for (k, (&w, &b)) in weight_lens.iter().zip(bias_lens).enumerate() {
        if b == 0 || w % b != 0 {
            return Err(CodecError::Malformed(format!(
                "layer {k}: {w} weights do not divide into {b} outputs"
            )));
        }
        let inputs = w / b;
        match sizes.last() {
            None => sizes.push(inputs),
            Some(&prev) if prev != inputs => {
                return Err(CodecError::Malformed(format!(
                    "layer {k} takes {inputs} inputs but previous layer outputs {prev}"
                )));
            }
            Some(_) => {}
        }
        sizes.push(b);
    }
    let topology = Topology::new(sizes)?;
    Ok(ModelSummary {
        format,
        parameter_count: topology.parameter_count(),
        topology,
    })
}

pub fn save_file(
    path: impl AsRef<Path>,
    network: &Network,
    format: ModelFormat,
) -> Result<(), CodecError> {
    let path = path.as_ref();
    let io_err = |source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(fs::File::create(path).map_err(io_err)?);
    write_model(&mut writer, network, format).map_err(io_err)?;
    writer.flush().map_err(io_err)
}

pub fn load_file(path: impl AsRef<Path>, topology: &Topology) -> Result<Network, CodecError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes, topology)
}

fn open(bytes: &[u8]) -> Result<(ModelFormat, Reader<'_>), CodecError> {
    let mut r = Reader {
        cursor: Cursor::new(bytes),
    };
    if bytes.starts_with(&MAGIC) {
        r.cursor.set_position(MAGIC.len() as u64);
        let version = r.u32()?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        Ok((ModelFormat::Versioned, r))
    } else {
        Ok((ModelFormat::Raw, r))
    }
}

struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl Reader<'_> {
    fn offset(&self) -> usize {
        self.cursor.position() as usize
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.offset())
    }

    /// Fails with `Truncated` unless `n` more bytes are available.
    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(CodecError::Truncated {
                offset: self.offset(),
                needed: n - remaining,
            });
        }
        Ok(())
    }

    /// Run one read of `n` bytes, reporting end of input as `Truncated`.
    fn read<T>(
        &mut self,
        n: usize,
        f: impl FnOnce(&mut Cursor<&[u8]>) -> io::Result<T>,
    ) -> Result<T, CodecError> {
        let offset = self.offset();
        let remaining = self.remaining();
        f(&mut self.cursor).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::Truncated {
                offset,
                needed: n.saturating_sub(remaining),
            },
            _ => CodecError::Stream(e),
        })
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.read(4, |c| c.read_u32::<LittleEndian>())
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        self.read(8, |c| c.read_u64::<LittleEndian>())
    }

    /// Read one length-prefixed block, rejecting it before reading the payload
    /// when `expected` is given and differs.
    fn block(&mut self, index: usize, expected: Option<usize>) -> Result<Vec<f32>, CodecError> {
        let len = self.u64()?;
        if let Some(expected) = expected {
            if len != expected as u64 {
                return Err(CodecError::LengthMismatch {
                    block: index,
                    expected,
                    actual: len,
                });
            }
        }
        let count = usize::try_from(len).unwrap_or(usize::MAX);
        let byte_len = count.saturating_mul(4);
        // Checked before allocating.
        self.ensure(byte_len)?;
        let mut values = vec![0.0f32; count];
        self.read(byte_len, |c| c.read_f32_into::<LittleEndian>(&mut values))?;
        Ok(values)
    }

    fn at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
