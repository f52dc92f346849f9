//! 通用工具函数

use crate::error::{Result, TpsError};
use chrono::{NaiveDate, Utc};

pub const TARGET_COLOR: &str = "255,0,0";
pub const OAR_COLOR: &str = "0,255,0";
pub const NORMAL_COLOR: &str = "0,0,255";

const OAR_KEYWORDS: [&str; 7] = ["OAR", "ORGAN", "EYE", "LENS", "NERVE", "BRAINSTEM", "HIPPOCAMPUS"];
const NORMAL_KEYWORDS: [&str; 2] = ["BODY", "BONE"];

/// 根据结构名推断 ROI 类型与默认颜色
pub fn classify_structure_name(name: &str) -> (&'static str, &'static str) {
    let upper = name.to_uppercase();
    if OAR_KEYWORDS.iter().any(|k| upper.contains(k)) {
        ("OAR", OAR_COLOR)
    } else if NORMAL_KEYWORDS.iter().any(|k| upper.contains(k)) {
        ("Normal", NORMAL_COLOR)
    } else {
        ("Target", TARGET_COLOR)
    }
}

/// 解析 `"r,g,b"` 颜色字符串
pub fn parse_color(value: &str) -> Option<[u8; 3]> {
    let parts: Vec<u8> = value
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [r, g, b] => Some([*r, *g, *b]),
        _ => None,
    }
}

pub fn format_color(rgb: [u8; 3]) -> String {
    format!("{},{},{}", rgb[0], rgb[1], rgb[2])
}

/// 解析 `YYYY-MM-DD` 格式的出生日期
pub fn parse_birth_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| TpsError::validation("Invalid birth date format. Use YYYY-MM-DD"))
}

/// 数据集名只能是单级目录名
pub fn validate_dataset_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(TpsError::validation(format!("Invalid dataset name: {}", name)));
    }
    Ok(())
}

/// 生成文件名时间戳，精确到毫秒，形如 `20240101_120000_123`
pub fn file_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_structure_name() {
        assert_eq!(classify_structure_name("Brainstem"), ("OAR", OAR_COLOR));
        assert_eq!(classify_structure_name("L_Eye"), ("OAR", OAR_COLOR));
        assert_eq!(classify_structure_name("External BODY"), ("Normal", NORMAL_COLOR));
        assert_eq!(classify_structure_name("PTV_70"), ("Target", TARGET_COLOR));
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("255, 0,12"), Some([255, 0, 12]));
        assert_eq!(parse_color("255,0"), None);
        assert_eq!(parse_color("red"), None);
        assert_eq!(format_color([1, 2, 3]), "1,2,3");
    }

    #[test]
    fn test_parse_birth_date() {
        assert_eq!(
            parse_birth_date("1975-12-31").unwrap(),
            NaiveDate::from_ymd_opt(1975, 12, 31).unwrap()
        );
        assert!(matches!(parse_birth_date("31/12/1975"), Err(TpsError::Validation(_))));
    }

    #[test]
    fn test_validate_dataset_name() {
        assert!(validate_dataset_name("head_neck").is_ok());
        assert!(validate_dataset_name("../etc").is_err());
        assert!(validate_dataset_name("a/b").is_err());
        assert!(validate_dataset_name("").is_err());
    }

    #[test]
    fn test_file_timestamp_has_millis() {
        let stamp = file_timestamp();
        assert_eq!(stamp.len(), "20240101_120000_123".len());
        assert_eq!(stamp.matches('_').count(), 2);
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }
}
