use crate::ObjectStore;
use base64::Engine as _;
use dm_core::DocRecord;
use dm_error::{DmError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

pub const FULL_FOLDER: &str = "full";
pub const THUMBNAIL_FOLDER: &str = "thumbnails";

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9.-]").expect("valid file name pattern"));

/// 解码后的 data URL
#[derive(Debug, Clone, PartialEq)]
pub struct DataUrl {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub fn is_data_url(s: &str) -> bool {
    s.starts_with("data:")
}

/// 解析 `data:<mime>;base64,<payload>`；缺少 mime 时按 image/png 处理
pub fn parse_data_url(s: &str) -> Result<DataUrl> {
    let rest = s
        .strip_prefix("data:")
        .ok_or_else(|| DmError::invalid("not a data url"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| DmError::invalid("data url without payload"))?;
    let mime_type = meta
        .strip_suffix(";base64")
        .filter(|m| !m.is_empty())
        .unwrap_or("image/png")
        .to_string();
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
    Ok(DataUrl { mime_type, bytes })
}

pub fn to_data_url(mime_type: &str, base64_payload: &str) -> String {
    format!("data:{};base64,{}", mime_type, base64_payload)
}

/// `<folder>/<毫秒时间戳>_<安全文件名>`
pub fn storage_path(folder: &str, file_name: &str, millis: i64) -> String {
    let safe_name = UNSAFE_CHARS.replace_all(file_name, "_");
    format!("{}/{}_{}", folder, millis, safe_name)
}

/// 从公开 URL 反推对象路径：取 `<bucket>/` 之后的部分
pub fn extract_storage_path(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("{}/", bucket);
    let idx = url.find(&marker)?;
    let path = &url[idx + marker.len()..];
    (!path.is_empty()).then(|| path.to_string())
}

async fn upload_one(
    objects: &dyn ObjectStore,
    data_url: &str,
    file_name: &str,
    folder: &str,
) -> Result<String> {
    let decoded = parse_data_url(data_url)?;
    let path = storage_path(folder, file_name, chrono::Utc::now().timestamp_millis());
    objects
        .upload(&path, decoded.bytes, &decoded.mime_type)
        .await
}

/// 写库前把内联的 data URL 图片上传到对象存储并换成公开 URL
///
/// 单张图片上传失败不影响写库，保留内联数据。
pub async fn externalize_images(mut record: DocRecord, objects: &dyn ObjectStore) -> DocRecord {
    if is_data_url(&record.full_image) {
        match upload_one(objects, &record.full_image, &record.file_name, FULL_FOLDER).await {
            Ok(url) => record.full_image = url,
            Err(e) => tracing::warn!(record_id = %record.id, error = %e, "full image upload failed, keeping inline data"),
        }
    }
    if is_data_url(&record.thumbnail) {
        match upload_one(objects, &record.thumbnail, &record.file_name, THUMBNAIL_FOLDER).await {
            Ok(url) => record.thumbnail = url,
            Err(e) => tracing::warn!(record_id = %record.id, error = %e, "thumbnail upload failed, keeping inline data"),
        }
    }
    record
}

/// 删除记录关联的已上传图片
pub async fn remove_images(record: &DocRecord, objects: &dyn ObjectStore) -> Result<()> {
    let bucket = objects.bucket();
    let paths: Vec<String> = [&record.thumbnail, &record.full_image]
        .into_iter()
        .filter(|url| url.contains(bucket))
        .filter_map(|url| extract_storage_path(url, bucket))
        .collect();
    if paths.is_empty() {
        return Ok(());
    }
    objects.remove(&paths).await
}
