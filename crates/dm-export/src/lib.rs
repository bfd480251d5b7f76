//! 批量导出：每条纪要一个 Markdown 文件，打包成 zip

use chrono::NaiveDate;
use dm_core::DocRecord;
use dm_error::{DmError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const EXPORT_FOLDER: &str = "专家访谈纪要";
const UNKNOWN_TIME: &str = "未知";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFailure {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub bytes: Vec<u8>,
    pub file_name: String,
    /// 压缩包内的条目路径
    pub exported: Vec<String>,
    pub failures: Vec<ExportFailure>,
}

pub fn archive_name(date: NaiveDate) -> String {
    format!("DocuMind_Export_{}.zip", date.format("%Y-%m-%d"))
}

/// `/ \ ? % * : | " < >` 替换为 `-`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => '-',
            other => other,
        })
        .collect()
}

/// 单条纪要渲染为 Markdown
pub fn render_markdown(record: &DocRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", record.title));
    out.push_str(&format!(
        "**访谈时间: {}**\n\n",
        record
            .interview_time
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(UNKNOWN_TIME)
    ));
    out.push_str(&format!("*关键词: {}*\n\n", record.keywords.join(", ")));
    if let Some(abs) = record.abstract_text.as_deref().filter(|a| !a.is_empty()) {
        out.push_str("## 摘要\n\n");
        out.push_str(abs);
        out.push_str("\n\n");
    }
    out.push_str("## 正文内容\n\n");
    out.push_str(&record.content);
    out.push('\n');
    out
}

fn base_name(record: &DocRecord) -> Result<String> {
    let raw = if record.title.trim().is_empty() {
        record.file_name.trim()
    } else {
        record.title.trim()
    };
    if raw.is_empty() {
        return Err(DmError::Validation {
            message: "record has neither title nor file name".to_string(),
        });
    }
    Ok(sanitize_file_name(raw))
}

/// 同名时追加 ` (n)`，n 递增到压缩包里没有的名字为止
fn unique_entry_name(used: &mut HashSet<String>, base: &str) -> String {
    let mut name = format!("{}/{}.md", EXPORT_FOLDER, base);
    let mut n = 1;
    while used.contains(&name) {
        name = format!("{}/{} ({}).md", EXPORT_FOLDER, base, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

fn zip_error(e: zip::result::ZipError) -> DmError {
    DmError::Internal {
        message: "zip write failed".to_string(),
        details: Some(e.to_string()),
    }
}

/// 单条失败只记入 `failures`，压缩包本身写不出来才整体失败
pub fn export_records(records: &[&DocRecord], date: NaiveDate) -> Result<ExportArchive> {
    if records.is_empty() {
        return Err(DmError::invalid("no records selected"));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .add_directory(format!("{}/", EXPORT_FOLDER), options)
        .map_err(zip_error)?;

    let mut used: HashSet<String> = HashSet::new();
    let mut exported = Vec::with_capacity(records.len());
    let mut failures = Vec::new();

    for record in records {
        let base = match base_name(record) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "record skipped in export");
                failures.push(ExportFailure {
                    id: record.id,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let name = unique_entry_name(&mut used, &base);

        writer.start_file(name.as_str(), options).map_err(zip_error)?;
        writer
            .write_all(render_markdown(record).as_bytes())
            .map_err(|e| DmError::Io {
                path: name.clone(),
                message: e.to_string(),
            })?;
        exported.push(name);
    }

    let bytes = writer.finish().map_err(zip_error)?.into_inner();
    tracing::info!(
        exported = exported.len(),
        failed = failures.len(),
        size_kb = bytes.len() / 1024,
        "export archive built"
    );
    Ok(ExportArchive {
        bytes,
        file_name: archive_name(date),
        exported,
        failures,
    })
}
