use crate::config::{AnchorPick, TableScrape};
use crate::error::{PipelineError, Result};
use crate::structs::{Batch, Schema, Value};
use log::{debug, info, warn};
use scraper::{ElementRef, Html, Selector};

/// Retrieves raw markup for a URL. No retry or timeout policy lives here.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<String>;
}

impl<F> Fetch for F
where
    F: Fn(&str) -> Result<String>,
{
    fn fetch(&self, url: &str) -> Result<String> {
        self(url)
    }
}

/// Blocking HTTP fetcher.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        self.client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
            .map_err(|e| PipelineError::unavailable(url, e))
    }
}

/// Fetches `url` and scrapes the configured table out of it.
pub fn read_html_table(fetcher: &dyn Fetch, url: &str, scrape: &TableScrape) -> Result<Batch> {
    let markup = fetcher.fetch(url)?;
    info!("Fetched {} bytes from {}", markup.len(), url);
    let batch = scrape_table(&markup, url, scrape)?;
    if batch.skipped() > 0 {
        warn!("Skipped {} malformed rows in {}", batch.skipped(), url);
    }
    Ok(batch)
}

/// Reads name/value pairs from the `table_index`-th `tbody` of `markup`.
///
/// Rows without `td` cells (header rows) and rows without an anchor in the
/// name column are passed over. Rows whose value is the sentinel token are
/// dropped. Rows that cannot be read are counted as skipped.
pub fn scrape_table(markup: &str, source: &str, scrape: &TableScrape) -> Result<Batch> {
    let tbody = selector("tbody")?;
    let tr = selector("tr")?;
    let td = selector("td")?;
    let anchor = selector("a")?;

    let schema = Schema::new([scrape.name_field.as_str(), scrape.value_field.as_str()])?;
    let document = Html::parse_document(markup);
    let table = document
        .select(&tbody)
        .nth(scrape.table_index)
        .ok_or_else(|| {
            PipelineError::unavailable(
                source,
                format!("no table body at index {}", scrape.table_index),
            )
        })?;

    let mut batch = Batch::new(source, schema);
    for (i, row) in table.select(&tr).enumerate() {
        if scrape.row_limit.is_some_and(|limit| batch.len() >= limit) {
            break;
        }
        let cells: Vec<ElementRef> = row.select(&td).collect();
        if cells.is_empty() {
            continue;
        }
        match scrape_row(&cells, &anchor, scrape, i + 1) {
            Ok(Some(values)) => batch.push(values)?,
            Ok(None) => {}
            Err(err) => {
                debug!("{}: {}", source, err);
                batch.mark_skipped();
            }
        }
    }

    Ok(batch)
}

fn scrape_row(
    cells: &[ElementRef],
    anchor: &Selector,
    scrape: &TableScrape,
    row: usize,
) -> Result<Option<Vec<Value>>> {
    let name_cell = cells
        .get(scrape.anchor_column)
        .ok_or_else(|| PipelineError::malformed(row, "no name cell"))?;
    let mut anchors = name_cell.select(anchor);
    let picked = match scrape.anchor_pick {
        AnchorPick::First => anchors.next(),
        AnchorPick::Last => anchors.last(),
    };
    let Some(picked) = picked else {
        return Ok(None);
    };
    let name = picked.text().collect::<String>().trim().to_string();

    let value_cell = cells
        .get(scrape.value_column)
        .ok_or_else(|| PipelineError::malformed(row, "no value cell"))?;
    let raw = value_cell
        .text()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::malformed(row, "empty value cell"))?;

    if scrape.sentinel.as_deref() == Some(raw) {
        return Ok(None);
    }

    let value = if scrape.numeric_value {
        raw.replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Number)
            .ok_or_else(|| PipelineError::malformed(row, format!("not a number: {}", raw)))?
    } else {
        Value::infer(raw)
    };

    Ok(Some(vec![Value::Text(name), value]))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| PipelineError::Data(format!("invalid selector {}: {:?}", css, e)))
}
