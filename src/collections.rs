use anyhow::Result;

use crate::models::CollectionInfo;
use crate::progress::format_number;
use crate::store::DocumentStore;

pub async fn list_collections(store: &dyn DocumentStore) -> Result<()> {
    let collections = store.list_collections().await?;
    print!("{}", render_table(&collections));
    Ok(())
}

pub fn render_table(collections: &[CollectionInfo]) -> String {
    let width = collections
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0)
        .max("COLLECTION".len());

    let mut out = format!("{:<width$}  DOCUMENTS\n", "COLLECTION", width = width);
    for c in collections {
        let count = c.doc_count.map(format_number).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("{:<width$}  {}\n", c.name, count, width = width));
    }
    out
}
