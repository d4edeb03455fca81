/*!
RAC text fixtures

Builds rac-style output (`key : value` blocks separated by blank lines) so
tests read like the real thing without hand-writing whole listings.
*/

use chrono::{Duration, Local, NaiveDateTime};

pub const RAC_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Local wall-clock time `minutes` ago (negative values are in the future)
pub fn minutes_ago(minutes: i64) -> NaiveDateTime {
    Local::now().naive_local() - Duration::minutes(minutes)
}

pub fn rac_time(at: NaiveDateTime) -> String {
    at.format(RAC_TIME_FORMAT).to_string()
}

#[derive(Debug, Clone, Default)]
pub struct RacText {
    blocks: Vec<Vec<(String, String)>>,
}

impl RacText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(mut self, fields: &[(&str, &str)]) -> Self {
        self.blocks.push(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn cluster(self, id: &str, name: &str, host: &str, port: u16) -> Self {
        self.block(&[
            ("cluster", id),
            ("host", host),
            ("port", port.to_string().as_str()),
            ("name", format!("\"{name}\"").as_str()),
            ("expiration-timeout", "60"),
            ("lifetime-limit", "0"),
            ("security-level", "0"),
        ])
    }

    pub fn infobase(self, id: &str, name: &str) -> Self {
        self.block(&[("infobase", id), ("name", name), ("descr", "\"\"")])
    }

    pub fn session(
        self,
        id: &str,
        user: &str,
        hibernate: bool,
        last_active: NaiveDateTime,
    ) -> Self {
        self.block(&[
            ("session", id),
            ("session-id", "1"),
            ("infobase", "00000000-0000-0000-0000-00000000000b"),
            ("user-name", user),
            ("host", "client-pc"),
            ("app-id", "1CV8C"),
            ("started-at", rac_time(last_active - Duration::hours(1)).as_str()),
            ("last-active-at", rac_time(last_active).as_str()),
            ("hibernate", if hibernate { "yes" } else { "no" }),
        ])
    }

    /// Entry of `connection list`
    pub fn connection(self, id: &str, application: &str, connected_at: NaiveDateTime) -> Self {
        self.block(&[
            ("connection", id),
            ("conn-id", "1"),
            ("host", "srv-1c"),
            ("process", "11111111-0000-0000-0000-000000000000"),
            ("infobase", "00000000-0000-0000-0000-00000000000b"),
            ("application", format!("\"{application}\"").as_str()),
            ("connected-at", rac_time(connected_at).as_str()),
        ])
    }

    /// Entry of `job list`
    pub fn job(self, id: &str, started_at: NaiveDateTime, state: Option<&str>) -> Self {
        let started = rac_time(started_at);
        let mut fields = vec![
            ("job", id),
            ("infobase", "00000000-0000-0000-0000-00000000000b"),
            ("started-at", started.as_str()),
        ];
        if let Some(state) = state {
            fields.push(("state", state));
        }
        self.block(&fields)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn build(&self) -> String {
        self.blocks
            .iter()
            .map(|block| {
                block
                    .iter()
                    .map(|(k, v)| format!("{k:<20}: {v}\n"))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_blank_line_separated() {
        let text = RacText::new()
            .block(&[("a", "1")])
            .block(&[("b", "2")])
            .build();
        assert_eq!(text, format!("{:<20}: 1\n\n{:<20}: 2\n", "a", "b"));
    }

    #[test]
    fn cluster_name_is_quoted() {
        let text = RacText::new().cluster("abc", "Main", "srv", 1541).build();
        assert!(text.contains("\"Main\""));
        assert!(text.contains("1541"));
    }
}
