//! Repositories for static reference lists
//!
//! Three small lists drive filtering and scoring decisions: mass-scanner
//! IPs (reputation correction), "what's my IP" probe domains (never real
//! attackers), and high-risk networks (threat-level infrastructure score).
//! Each keeps a per-run in-memory cache and supports a replace-all refresh
//! from its upstream source.

use std::collections::HashSet;

use ipnetwork::IpNetwork;
use sqlx::PgPool;

use crate::error::Result;

/// Known mass-scanner IP addresses.
pub struct MassScannerRepository {
    pool: PgPool,
    cache: HashSet<String>,
}

impl MassScannerRepository {
    pub async fn new(pool: PgPool) -> Result<Self> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT ip_address FROM mass_scanners")
            .fetch_all(&pool)
            .await?;
        Ok(Self {
            pool,
            cache: rows.into_iter().map(|(ip,)| ip).collect(),
        })
    }

    pub fn addresses(&self) -> &HashSet<String> {
        &self.cache
    }

    pub async fn replace_all(&mut self, addresses: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mass_scanners")
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            "INSERT INTO mass_scanners (ip_address) SELECT * FROM UNNEST($1::text[]) ON CONFLICT DO NOTHING",
        )
        .bind(addresses)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        self.cache = addresses.iter().cloned().collect();
        Ok(inserted)
    }
}

/// Known "what's my IP" service domains. Honeypot malware probes these to
/// learn its own address; they are never attacker infrastructure.
pub struct WhatsMyIpRepository {
    pool: PgPool,
    cache: HashSet<String>,
}

impl WhatsMyIpRepository {
    pub async fn new(pool: PgPool) -> Result<Self> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT domain FROM whatsmyip_domains")
            .fetch_all(&pool)
            .await?;
        Ok(Self {
            pool,
            cache: rows.into_iter().map(|(domain,)| domain).collect(),
        })
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.cache.contains(domain)
    }

    pub async fn add_domain(&mut self, domain: &str) -> Result<bool> {
        if self.cache.contains(domain) {
            return Ok(false);
        }
        sqlx::query("INSERT INTO whatsmyip_domains (domain) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(domain)
            .execute(&self.pool)
            .await?;
        self.cache.insert(domain.to_string());
        // drop any IOC record mistakenly created before the domain was known
        sqlx::query("DELETE FROM iocs WHERE name = $1")
            .bind(domain)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }
}

/// High-risk networks: ASNs and CIDR ranges from a do-not-route style list.
pub struct HighRiskNetworkRepository {
    pool: PgPool,
    asns: HashSet<String>,
    networks: Vec<IpNetwork>,
}

impl HighRiskNetworkRepository {
    pub async fn new(pool: PgPool) -> Result<Self> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT asn, network FROM highrisk_networks")
                .fetch_all(&pool)
                .await?;
        let mut asns = HashSet::new();
        let mut networks = Vec::new();
        for (asn, network) in rows {
            if !asn.is_empty() {
                asns.insert(asn);
            }
            if let Some(cidr) = network {
                match cidr.parse::<IpNetwork>() {
                    Ok(parsed) => networks.push(parsed),
                    Err(e) => tracing::debug!(cidr, error = %e, "skipping invalid network range"),
                }
            }
        }
        Ok(Self {
            pool,
            asns,
            networks,
        })
    }

    pub fn high_risk_asns(&self) -> &HashSet<String> {
        &self.asns
    }

    pub fn contains_address(&self, addr: &std::net::IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(*addr))
    }

    pub async fn replace_all(&mut self, entries: &[(String, Option<String>)]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM highrisk_networks")
            .execute(&mut *tx)
            .await?;
        let asns: Vec<String> = entries.iter().map(|(asn, _)| asn.clone()).collect();
        let networks: Vec<Option<String>> = entries.iter().map(|(_, n)| n.clone()).collect();
        let inserted = sqlx::query(
            "INSERT INTO highrisk_networks (asn, network) SELECT * FROM UNNEST($1::text[], $2::text[])",
        )
        .bind(&asns)
        .bind(&networks)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        self.asns = entries
            .iter()
            .filter(|(asn, _)| !asn.is_empty())
            .map(|(asn, _)| asn.clone())
            .collect();
        self.networks = entries
            .iter()
            .filter_map(|(_, n)| n.as_ref().and_then(|c| c.parse().ok()))
            .collect();
        Ok(inserted)
    }
}
