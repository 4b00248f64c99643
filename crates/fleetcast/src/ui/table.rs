use fleetcast_dispatch::{ResultPayload, TargetLink};
use tabled::{
    Table, Tabled,
    settings::{Panel, Remove, Style, object::Rows},
};

pub struct Formatter;

#[derive(Debug, Clone, Default)]
pub struct FormatConfig {
    pub header:      Option<String>,
    pub footer:      Option<String>,
    /// Drop the column-name row.
    pub hide_header: bool,
}

impl Formatter {
    pub fn table<T: Tabled>(data: impl IntoIterator<Item = T>, config: FormatConfig) -> Table {
        let mut table = Table::new(data);
        if config.hide_header {
            table.with(Remove::row(Rows::first()));
        }
        if let Some(header) = config.header {
            table.with(Panel::header(header));
        }
        if let Some(footer) = config.footer {
            table.with(Panel::footer(footer));
        }

        table.with(Style::blank());
        table
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct StatusRow {
    #[tabled(rename = "NODE")]
    pub node:     String,
    #[tabled(rename = "PROJECT")]
    pub project:  String,
    #[tabled(rename = "STATUS")]
    pub status:   String,
    #[tabled(rename = "CODE")]
    pub code:     String,
    #[tabled(rename = "TIME")]
    pub duration: String,
    #[tabled(rename = "SIZE")]
    pub size:     String,
    #[tabled(rename = "DETAIL")]
    pub detail:   String,
}

/// One row per target. Results that are not delivery payloads (for example
/// a cancellation note) go to the detail column as-is.
pub fn status_rows<'a>(targets: impl IntoIterator<Item = &'a TargetLink>) -> Vec<StatusRow> {
    targets
        .into_iter()
        .map(|link| {
            let raw = link.result.clone().unwrap_or_default();
            let (code, duration, size, detail) = match serde_json::from_str::<ResultPayload>(&raw) {
                Ok(p) => (p.code.to_string(), p.upload_duration, p.upload_file_size, p.msg),
                Err(_) => (String::new(), String::new(), String::new(), raw),
            };
            StatusRow {
                node: link.key.node_id.clone(),
                project: link.key.project_id.clone(),
                status: link.status.to_string(),
                code,
                duration,
                size,
                detail,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcast_dispatch::{Status, TargetKey};

    #[test]
    fn test_status_rows() {
        let mut ok = TargetLink::new(TargetKey::new("web-1", "shop"));
        ok.status = Status::Ok;
        ok.result = Some(
            r#"{"code":200,"msg":"placed app.jar","upload_duration":"2.0s","upload_file_size":"1.00 MiB"}"#
                .into(),
        );
        let mut cancelled = TargetLink::new(TargetKey::new("web-2", "shop"));
        cancelled.status = Status::Cancelled;
        cancelled.result = Some("cancelled before start".into());

        let rows = status_rows([&ok, &cancelled]);
        assert_eq!(rows[0].code, "200");
        assert_eq!(rows[0].size, "1.00 MiB");
        assert_eq!(rows[1].code, "");
        assert_eq!(rows[1].detail, "cancelled before start");

        let rendered = Formatter::table(rows, FormatConfig::default()).to_string();
        assert!(rendered.contains("web-1"));
        assert!(rendered.contains("STATUS"));
    }
}
