//! numpy `.npy` 数组编解码
//!
//! 写出固定为 v1.0、`<f4`、C 顺序；读取支持 v1/v2/v3 头以及
//! `<f4`、`<f8`、`<i2`、`<i4`、`|u1`、`|b1` 六种元素类型（C 顺序）。

use radiate_core::{Result, TpsError};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// 解码后的数组
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// 将 `f32` 数组编码为 `.npy` 字节
pub fn encode_f32(shape: &[usize], data: &[f32]) -> Result<Vec<u8>> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(TpsError::Imaging(format!(
            "npy shape {:?} does not match {} values",
            shape,
            data.len()
        )));
    }

    let shape_str = match shape {
        [single] => format!("({},)", single),
        _ => format!(
            "({})",
            shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': {}, }}",
        shape_str
    );
    // magic(6) + version(2) + len(2) + header + '\n' 对齐到 64 字节
    let unpadded = 10 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + data.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

/// 解码 `.npy` 字节为 `f32` 数组
pub fn decode(bytes: &[u8]) -> Result<NpyArray> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(TpsError::Imaging("not a .npy file".to_string()));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(TpsError::Imaging("truncated .npy header".to_string()));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(TpsError::Imaging(format!("unsupported .npy version {}", v))),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(TpsError::Imaging("truncated .npy header".to_string()));
    }
    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| TpsError::Imaging("invalid .npy header encoding".to_string()))?;

    let descr = header_value(header, "descr")
        .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
        .ok_or_else(|| TpsError::Imaging("npy header has no descr".to_string()))?;
    if header_value(header, "fortran_order").as_deref() == Some("True") {
        return Err(TpsError::Imaging("fortran-ordered .npy arrays are not supported".to_string()));
    }
    let shape = parse_shape(header)?;
    let count: usize = shape.iter().product();
    let payload = &bytes[data_start..];

    let data = match descr.as_str() {
        "<f4" => read_values(payload, count, 4, |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))?,
        "<f8" => read_values(payload, count, 8, |b| {
            f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
        })?,
        "<i2" => read_values(payload, count, 2, |b| i16::from_le_bytes([b[0], b[1]]) as f32)?,
        "<i4" => read_values(payload, count, 4, |b| {
            i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32
        })?,
        "|u1" | "|b1" => read_values(payload, count, 1, |b| b[0] as f32)?,
        other => {
            return Err(TpsError::Imaging(format!("unsupported .npy dtype {}", other)));
        }
    };
    Ok(NpyArray { shape, data })
}

fn read_values(
    payload: &[u8],
    count: usize,
    width: usize,
    convert: impl Fn(&[u8]) -> f32,
) -> Result<Vec<f32>> {
    if payload.len() < count * width {
        return Err(TpsError::Imaging(format!(
            "npy payload has {} bytes, expected {}",
            payload.len(),
            count * width
        )));
    }
    Ok(payload[..count * width].chunks_exact(width).map(convert).collect())
}

/// 取出头部字典中某个键的原始值文本
fn header_value(header: &str, key: &str) -> Option<String> {
    let pattern = format!("'{}':", key);
    let start = header.find(&pattern)? + pattern.len();
    let rest = header[start..].trim_start();
    if rest.starts_with('(') {
        let end = rest.find(')')?;
        return Some(rest[..=end].to_string());
    }
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].trim().trim_end_matches('}').trim().to_string())
}

fn parse_shape(header: &str) -> Result<Vec<usize>> {
    let raw = header_value(header, "shape")
        .ok_or_else(|| TpsError::Imaging("npy header has no shape".to_string()))?;
    raw.trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| TpsError::Imaging(format!("invalid npy shape {}", raw)))
        })
        .collect()
}
