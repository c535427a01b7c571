//! Builders for scale export CSV files.

#![allow(dead_code)]

use scale_ingest::validator::Column;

/// One data row. Defaults describe a successful 9 kg fill.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    pub transact_no: String,
    pub scale_name: String,
    pub cyl_size: String,
    pub tare_weight: String,
    pub fill_kgs: String,
    pub residual: String,
    pub success: String,
    pub started: String,
    pub fill_time: String,
}

impl RowBuilder {
    pub fn new(scale_name: &str, transact_no: i64) -> Self {
        Self {
            transact_no: transact_no.to_string(),
            scale_name: scale_name.to_string(),
            cyl_size: "9kg".to_string(),
            tare_weight: "10.2".to_string(),
            fill_kgs: "9.0".to_string(),
            residual: "0.1".to_string(),
            success: "Y".to_string(),
            started: "2025-10-14 08:30:00".to_string(),
            fill_time: "45".to_string(),
        }
    }

    pub fn fill_kgs(mut self, value: &str) -> Self {
        self.fill_kgs = value.to_string();
        self
    }

    pub fn success(mut self, value: &str) -> Self {
        self.success = value.to_string();
        self
    }

    pub fn started(mut self, value: &str) -> Self {
        self.started = value.to_string();
        self
    }

    pub fn transact_no(mut self, value: &str) -> Self {
        self.transact_no = value.to_string();
        self
    }

    fn render(&self) -> String {
        [
            &self.transact_no,
            &self.scale_name,
            &self.cyl_size,
            &self.tare_weight,
            &self.fill_kgs,
            &self.residual,
            &self.success,
            &self.started,
            &self.fill_time,
        ]
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// Builder for a whole CSV file.
#[derive(Debug, Clone)]
pub struct CsvBuilder {
    headers: Vec<String>,
    rows: Vec<String>,
}

impl CsvBuilder {
    /// A file with every required column, in canonical order.
    pub fn new() -> Self {
        Self {
            headers: Column::ALL.iter().map(|c| c.header().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// A file whose header row lacks `missing`.
    pub fn without_column(missing: Column) -> Self {
        Self {
            headers: Column::ALL
                .iter()
                .filter(|c| **c != missing)
                .map(|c| c.header().to_string())
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, row: RowBuilder) -> Self {
        self.rows.push(row.render());
        self
    }

    /// Appends a pre-rendered line verbatim.
    pub fn raw_row(mut self, line: &str) -> Self {
        self.rows.push(line.to_string());
        self
    }

    /// `count` valid rows for `scale_name`, numbered from 1, one minute
    /// apart. Every third row is an unsuccessful fill.
    pub fn generated(scale_name: &str, count: i64) -> Self {
        (1..=count).fold(Self::new(), |builder, n| {
            let success = if n % 3 == 0 { "N" } else { "Y" };
            let started = format!("2025-10-14 {:02}:{:02}:00", 8 + (n - 1) / 60, (n - 1) % 60);
            builder.row(
                RowBuilder::new(scale_name, n)
                    .success(success)
                    .started(&started),
            )
        })
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.headers.join(",");
        for row in &self.rows {
            out.push_str("\r\n");
            out.push_str(row);
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

impl Default for CsvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of rows `CsvBuilder::generated` marks successful.
pub fn generated_success_count(count: i64) -> u64 {
    (1..=count).filter(|n| n % 3 != 0).count() as u64
}
