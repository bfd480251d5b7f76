use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;

static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[(.*?)\]\]").expect("valid citation pattern"));

pub const UNKNOWN_SOURCE: &str = "未知来源";

/// 单条消息中的一个引用
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationRef {
    pub number: usize,
    pub doc_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedMessage {
    /// 引用标记替换为徽标后的文本，Markdown 渲染交给前端
    pub html: String,
    /// 按首次出现顺序排列的不重复引用
    pub citations: Vec<CitationRef>,
}

/// 把回答中的 `[[id]]` 标记替换为编号徽标
///
/// 编号只在当前消息内有效：每个不同的 id 按首次出现的顺序从 1 开始编号，重复出现复用同一编号。
/// `lookup` 返回文档标题，查不到时显示“未知来源”。
pub fn render_citations<F>(content: &str, lookup: F) -> RenderedMessage
where
    F: Fn(&str) -> Option<String>,
{
    let mut numbers: HashMap<String, usize> = HashMap::new();
    let mut citations: Vec<CitationRef> = Vec::new();

    let html = CITATION_MARKER.replace_all(content, |caps: &Captures| {
        let doc_id = caps[1].to_string();
        let number = match numbers.get(&doc_id) {
            Some(n) => *n,
            None => {
                let n = citations.len() + 1;
                let title = lookup(&doc_id).unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
                numbers.insert(doc_id.clone(), n);
                citations.push(CitationRef {
                    number: n,
                    doc_id: doc_id.clone(),
                    title,
                });
                n
            }
        };
        let title = &citations[number - 1].title;
        format!(
            r#"<span class="citation-badge" data-id="{}" title="点击跳转: {}">{}</span>"#,
            escape_attr(&doc_id),
            escape_attr(title),
            number
        )
    });

    RenderedMessage {
        html: html.into_owned(),
        citations,
    }
}

/// 只提取引用的 id 序列（保持出现顺序，不去重）
pub fn citation_ids(content: &str) -> Vec<String> {
    CITATION_MARKER
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect()
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}
