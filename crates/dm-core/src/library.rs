use crate::models::DocRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// 判断记录是否命中查询：标题、正文或任一关键词包含查询串（忽略大小写）
pub fn record_matches(record: &DocRecord, query: &str) -> bool {
    let q = query.to_lowercase();
    record.title.to_lowercase().contains(&q)
        || record.content.to_lowercase().contains(&q)
        || record.keywords.iter().any(|k| k.to_lowercase().contains(&q))
}

/// 朴素子串过滤，不做分词和排序，保持输入顺序
pub fn filter_records<'a>(records: &'a [DocRecord], query: &str) -> Vec<&'a DocRecord> {
    if query.is_empty() {
        return records.iter().collect();
    }
    records.iter().filter(|r| record_matches(r, query)).collect()
}

/// 内存中的已入库记录视图，按创建时间倒序
///
/// 每次变更都替换整个 `Arc<Vec<_>>`，读者拿到的快照不会被修改。
#[derive(Debug, Clone, Default)]
pub struct Library {
    records: Arc<Vec<DocRecord>>,
}

impl Library {
    pub fn new(mut records: Vec<DocRecord>) -> Self {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            records: Arc::new(records),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<DocRecord>> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&DocRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn search(&self, query: &str) -> Vec<DocRecord> {
        filter_records(&self.records, query)
            .into_iter()
            .cloned()
            .collect()
    }

    /// 新记录插到最前；同 id 的旧记录被替换
    pub fn with_committed(&self, record: DocRecord) -> Self {
        let id = record.id;
        let mut next = Vec::with_capacity(self.records.len() + 1);
        next.push(record);
        next.extend(self.records.iter().filter(|r| r.id != id).cloned());
        Self {
            records: Arc::new(next),
        }
    }

    pub fn without(&self, id: Uuid) -> Self {
        Self {
            records: Arc::new(
                self.records
                    .iter()
                    .filter(|r| r.id != id)
                    .cloned()
                    .collect(),
            ),
        }
    }
}

/// 批量选择状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    mode: bool,
    ids: BTreeSet<Uuid>,
}

impl Selection {
    pub fn is_active(&self) -> bool {
        self.mode
    }

    pub fn ids(&self) -> &BTreeSet<Uuid> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    /// 切换选择模式，同时清空已选集合
    pub fn toggle_mode(&mut self) {
        self.mode = !self.mode;
        self.ids.clear();
    }

    pub fn toggle(&mut self, id: Uuid) {
        if !self.ids.remove(&id) {
            self.ids.insert(id);
        }
    }

    /// 全选当前过滤结果；若已选数量与过滤结果相同则清空
    pub fn select_all(&mut self, filtered: &[&DocRecord]) {
        if self.ids.len() == filtered.len() {
            self.ids.clear();
        } else {
            self.ids = filtered.iter().map(|r| r.id).collect();
        }
    }

    /// 记录被删除后同步移出选择集
    pub fn remove(&mut self, id: Uuid) {
        self.ids.remove(&id);
    }

    pub fn selected_records<'a>(&self, records: &'a [DocRecord]) -> Vec<&'a DocRecord> {
        records.iter().filter(|r| self.ids.contains(&r.id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(title: &str, content: &str, keywords: &[&str]) -> DocRecord {
        DocRecord {
            id: Uuid::new_v4(),
            file_name: format!("{}.png", title),
            title: title.to_string(),
            interview_time: None,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            abstract_text: None,
            content: content.to_string(),
            thumbnail: String::new(),
            full_image: String::new(),
            created_at: Utc::now(),
            tags: vec![],
        }
    }

    #[test]
    fn test_empty_query_returns_everything() {
        let records = vec![record("Alpha", "", &[]), record("Beta", "", &[])];
        assert_eq!(filter_records(&records, "").len(), 2);
    }

    #[test]
    fn test_keyword_match() {
        let records = vec![
            record("Alpha Review", "", &["growth"]),
            record("Beta Notes", "", &[]),
        ];
        let hits = filter_records(&records, "growth");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Alpha Review");
    }

    #[test]
    fn test_case_insensitive_title_and_content() {
        let records = vec![
            record("Alpha Review", "", &[]),
            record("Other", "the ALPHA channel", &[]),
            record("Gamma", "nothing", &["Margin"]),
        ];
        assert_eq!(filter_records(&records, "alpha").len(), 2);
        assert_eq!(filter_records(&records, "MARGIN").len(), 1);
        assert!(filter_records(&records, "zeta").is_empty());
    }

    #[test]
    fn test_library_orders_newest_first_and_replaces() {
        let mut old = record("Old", "", &[]);
        old.created_at = Utc::now() - Duration::hours(1);
        let new = record("New", "", &[]);
        let lib = Library::new(vec![old.clone(), new.clone()]);
        assert_eq!(lib.snapshot()[0].title, "New");

        let before = lib.snapshot();
        let newer = record("Newer", "", &[]);
        let lib2 = lib.with_committed(newer.clone());
        assert_eq!(lib2.snapshot()[0].id, newer.id);
        assert_eq!(before.len(), 2);
        assert_eq!(lib2.without(old.id).len(), 2);
    }

    #[test]
    fn test_toggle_mode_clears_selection() {
        let mut sel = Selection::default();
        sel.toggle_mode();
        let id = Uuid::new_v4();
        sel.toggle(id);
        assert!(sel.contains(id));
        sel.toggle_mode();
        assert!(!sel.is_active());
        assert!(sel.is_empty());
    }

    #[test]
    fn test_select_all_is_scoped_to_filtered_set() {
        let records = vec![
            record("Alpha", "", &["growth"]),
            record("Beta", "", &[]),
            record("Gamma", "", &["growth"]),
        ];
        let filtered = filter_records(&records, "growth");
        let mut sel = Selection::default();
        sel.toggle_mode();
        sel.select_all(&filtered);
        assert_eq!(sel.len(), 2);
        assert!(!sel.contains(records[1].id));

        sel.select_all(&filtered);
        assert!(sel.is_empty());
    }

    #[test]
    fn test_selected_records_and_remove() {
        let records = vec![record("Alpha", "", &[]), record("Beta", "", &[])];
        let mut sel = Selection::default();
        sel.toggle(records[0].id);
        sel.toggle(records[1].id);
        sel.remove(records[1].id);
        let picked = sel.selected_records(&records);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].title, "Alpha");
    }
}
