//! CDR database source
//!
//! Implements [`HistoricalSource`] against the PBX's CDR store. Each call
//! produces one CDR row with a source channel and (when answered) a
//! destination channel, so per-extension aggregates are the union of the
//! two legs: rows where the extension originated the call and rows where
//! it was the destination. Direction is classified by whether the far leg
//! matches one of the configured gateway patterns.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlPool, Row};
use tracing::{debug, info};

use crate::history::{HistoricalSource, HistoricalStats};

/// Pool over the CDR schema.
pub struct CdrDatabase {
    pool: MySqlPool,
    gateways: Vec<String>,
}

impl CdrDatabase {
    /// Connect to the CDR database. `gateways` are the normalized gateway
    /// tokens used to tell trunk legs from station legs.
    pub async fn connect(url: &str, gateways: Vec<String>) -> anyhow::Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await?;
        info!("connected to CDR database");
        Ok(Self { pool, gateways })
    }

    /// `channel LIKE '%gw%' OR dstchannel LIKE '%gw%'` over all gateway
    /// tokens. The tokens come from the trusted local configuration.
    fn gateway_clause(&self) -> String {
        if self.gateways.is_empty() {
            return "0".to_string();
        }
        self.gateways
            .iter()
            .map(|g| format!("channel LIKE '%{g}%' OR dstchannel LIKE '%{g}%'"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[async_trait]
impl HistoricalSource for CdrDatabase {
    async fn fetch(&self, date: NaiveDate) -> anyhow::Result<HashMap<String, HistoricalStats>> {
        let gateway_like = self.gateway_clause();
        let query = format!(
            r#"
            SELECT
                extension,
                CAST(SUM(total_calls) AS SIGNED) AS total_calls,
                CAST(SUM(answered_calls) AS SIGNED) AS answered_calls,
                CAST(SUM(missed_calls) AS SIGNED) AS missed_calls,
                CAST(SUM(total_duration) AS SIGNED) AS total_duration,
                CAST(SUM(inbound_calls) AS SIGNED) AS inbound_calls,
                CAST(SUM(outbound_calls) AS SIGNED) AS outbound_calls,
                CAST(SUM(internal_calls) AS SIGNED) AS internal_calls,
                MIN(first_call) AS first_call,
                MAX(last_call) AS last_call
            FROM (
                SELECT
                    SUBSTRING_INDEX(SUBSTRING_INDEX(channel, '/', -1), '-', 1) AS extension,
                    COUNT(*) AS total_calls,
                    SUM(CASE WHEN dstchannel IS NOT NULL AND dstchannel != '' THEN 1 ELSE 0 END) AS answered_calls,
                    SUM(CASE WHEN disposition IN ('NO ANSWER', 'NOANSWER') THEN 1 ELSE 0 END) AS missed_calls,
                    SUM(billsec) AS total_duration,
                    0 AS inbound_calls,
                    SUM(CASE WHEN ({gateway_like}) AND dstchannel REGEXP '^(PJSIP|SIP)/.*' THEN 1 ELSE 0 END) AS outbound_calls,
                    SUM(CASE WHEN NOT ({gateway_like}) OR dstchannel NOT REGEXP '^(PJSIP|SIP)/.*' THEN 1 ELSE 0 END) AS internal_calls,
                    MIN(calldate) AS first_call,
                    MAX(calldate) AS last_call
                FROM cdr
                WHERE calldate >= ? AND calldate < DATE_ADD(?, INTERVAL 1 DAY)
                  AND channel REGEXP '^(PJSIP|SIP)/[0-9]+'
                GROUP BY extension

                UNION ALL

                SELECT
                    SUBSTRING_INDEX(SUBSTRING_INDEX(dstchannel, '/', -1), '-', 1) AS extension,
                    COUNT(*) AS total_calls,
                    SUM(CASE WHEN dstchannel IS NOT NULL AND dstchannel != '' THEN 1 ELSE 0 END) AS answered_calls,
                    SUM(CASE WHEN disposition IN ('NO ANSWER', 'NOANSWER') THEN 1 ELSE 0 END) AS missed_calls,
                    SUM(billsec) AS total_duration,
                    SUM(CASE WHEN ({gateway_like}) AND channel REGEXP '^(PJSIP|SIP)/.*' THEN 1 ELSE 0 END) AS inbound_calls,
                    0 AS outbound_calls,
                    SUM(CASE WHEN NOT ({gateway_like}) OR channel NOT REGEXP '^(PJSIP|SIP)/.*' THEN 1 ELSE 0 END) AS internal_calls,
                    MIN(calldate) AS first_call,
                    MAX(calldate) AS last_call
                FROM cdr
                WHERE calldate >= ? AND calldate < DATE_ADD(?, INTERVAL 1 DAY)
                  AND dstchannel REGEXP '^(PJSIP|SIP)/[0-9]+'
                GROUP BY extension
            ) combined
            WHERE extension REGEXP '^[0-9]+$'
            GROUP BY extension
            "#
        );

        let day = date.to_string();
        let rows = sqlx::query(&query)
            .bind(&day)
            .bind(&day)
            .bind(&day)
            .bind(&day)
            .fetch_all(&self.pool)
            .await?;

        let mut stats = HashMap::new();
        for row in rows {
            let extension: String = row.try_get("extension")?;
            let num = |name: &str| -> u64 {
                row.try_get::<Option<i64>, _>(name)
                    .ok()
                    .flatten()
                    .unwrap_or(0)
                    .max(0) as u64
            };
            let when = |name: &str| {
                row.try_get::<Option<chrono::NaiveDateTime>, _>(name)
                    .ok()
                    .flatten()
                    .map(|t| t.and_utc())
            };
            stats.insert(
                extension,
                HistoricalStats {
                    total_calls: num("total_calls"),
                    answered_calls: num("answered_calls"),
                    missed_calls: num("missed_calls"),
                    total_duration: num("total_duration"),
                    inbound_calls: num("inbound_calls"),
                    outbound_calls: num("outbound_calls"),
                    internal_calls: num("internal_calls"),
                    first_call: when("first_call"),
                    last_call: when("last_call"),
                },
            );
        }
        debug!("CDR aggregate for {}: {} extensions", date, stats.len());
        Ok(stats)
    }
}
