//! Postgres store backend.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use error_stack::{Report, Result, ResultExt};
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Client, NoTls, Row};
use tracing::info;

use hypercerts_core::{
    entity::BlockStamp, token, units, validation, AllowListData, AllowListRecord, Attestation,
    Claim, Contract, ContractEvent, Fraction, MarketplaceOrder, Sale, SupportedSchema,
};

use crate::store::{HypercertsStore, LeafClaimOutcome, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PostgresStoreError {
    #[error("Missing connection string")]
    MissingConnectionString,
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub enum TlsConfiguration {
    #[default]
    NoTls,
    Tls {
        certificate: Option<std::path::PathBuf>,
        accept_invalid_hostnames: Option<bool>,
        accept_invalid_certificates: Option<bool>,
        disable_system_roots: Option<bool>,
        use_sni: Option<bool>,
    },
}

#[derive(Debug, Clone)]
pub struct PostgresStoreOptions {
    pub connection_string: String,
    pub tls: TlsConfiguration,
}

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(options: PostgresStoreOptions) -> std::result::Result<Self, PostgresStoreError> {
        if options.connection_string.is_empty() {
            return Err(PostgresStoreError::MissingConnectionString);
        }

        info!("connecting to database");
        let config: tokio_postgres::Config = options
            .connection_string
            .parse()
            .map_err(PostgresStoreError::Postgres)?;

        // All connector and connection types differ between branches, so
        // connect and spawn the connection inside each one.
        let client = match options.tls {
            TlsConfiguration::NoTls => {
                info!("Using insecure connection");
                let (client, connection) = config.connect(NoTls).await?;
                tokio::spawn(connection);
                client
            }
            TlsConfiguration::Tls {
                certificate,
                accept_invalid_hostnames,
                accept_invalid_certificates,
                disable_system_roots,
                use_sni,
            } => {
                info!("Configure TLS connection");
                let mut builder = TlsConnector::builder();

                if let Some(certificate) = certificate {
                    let certificate = tokio::fs::read(certificate).await?;
                    let certificate = Certificate::from_pem(&certificate)?;
                    builder.add_root_certificate(certificate);
                }

                if let Some(accept_invalid_certificates) = accept_invalid_certificates {
                    builder.danger_accept_invalid_certs(accept_invalid_certificates);
                }

                if let Some(disable_system_roots) = disable_system_roots {
                    builder.disable_built_in_roots(disable_system_roots);
                }

                if let Some(accept_invalid_hostnames) = accept_invalid_hostnames {
                    builder.danger_accept_invalid_hostnames(accept_invalid_hostnames);
                }

                if let Some(use_sni) = use_sni {
                    builder.use_sni(use_sni);
                }

                let connector = builder.build()?;
                let connector = MakeTlsConnector::new(connector);
                let (client, connection) = config.connect(connector).await?;
                tokio::spawn(connection);
                client
            }
        };

        info!("client connected successfully");
        Ok(Self { client })
    }
}

fn pg_err(err: tokio_postgres::Error) -> Report<StoreError> {
    Report::new(StoreError::Connection).attach_printable(err.to_string())
}

fn block_i64(value: u64, field: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .change_context(StoreError::Query)
        .attach_printable_lazy(|| format!("{field} {value} does not fit bigint"))
}

fn address_column(row: &Row, column: &str) -> Result<Address, StoreError> {
    let text: String = row.get(column);
    validation::parse_address(&text).change_context(StoreError::Corruption)
}

fn opt_address_column(row: &Row, column: &str) -> Result<Option<Address>, StoreError> {
    let text: Option<String> = row.get(column);
    text.map(|text| validation::parse_address(&text).change_context(StoreError::Corruption))
        .transpose()
}

fn u256_column(row: &Row, column: &str) -> Result<U256, StoreError> {
    let text: String = row.get(column);
    units::from_text(&text).change_context(StoreError::Corruption)
}

fn b256_column(row: &Row, column: &str) -> Result<B256, StoreError> {
    let text: String = row.get(column);
    validation::parse_b256(&text).change_context(StoreError::Corruption)
}

fn opt_block_column(row: &Row, column: &str) -> Option<u64> {
    let value: Option<i64> = row.get(column);
    value.map(|v| v as u64)
}

fn stamp_columns(row: &Row, number: &str, timestamp: &str) -> Option<BlockStamp> {
    match (opt_block_column(row, number), opt_block_column(row, timestamp)) {
        (Some(number), Some(timestamp)) => Some(BlockStamp { number, timestamp }),
        _ => None,
    }
}

fn u256_vec_json(values: &[U256]) -> serde_json::Value {
    serde_json::Value::Array(
        values
            .iter()
            .map(|v| serde_json::Value::String(v.to_string()))
            .collect(),
    )
}

fn address_vec_json(values: &[Address]) -> serde_json::Value {
    serde_json::Value::Array(
        values
            .iter()
            .map(|v| serde_json::Value::String(v.to_checksum(None)))
            .collect(),
    )
}

fn u256_vec_from_json(value: &serde_json::Value) -> Result<Vec<U256>, StoreError> {
    let array = value
        .as_array()
        .ok_or(StoreError::Corruption)
        .attach_printable("expected a JSON array")?;
    array
        .iter()
        .map(|item| {
            let text = item
                .as_str()
                .ok_or(StoreError::Corruption)
                .attach_printable("expected a string element")?;
            units::from_text(text).change_context(StoreError::Corruption)
        })
        .collect()
}

fn proof_json(proof: &[B256]) -> serde_json::Value {
    serde_json::Value::Array(
        proof
            .iter()
            .map(|node| serde_json::Value::String(format!("0x{}", hex::encode(node))))
            .collect(),
    )
}

fn claim_from_row(row: &Row) -> Result<Claim, StoreError> {
    Ok(Claim {
        contracts_id: row.get("contracts_id"),
        token_id: u256_column(row, "token_id")?,
        hypercert_id: row.get("hypercert_id"),
        creator_address: opt_address_column(row, "creator_address")?,
        owner_address: opt_address_column(row, "owner_address")?,
        units: u256_column(row, "units")?,
        uri: row.get("uri"),
        creation_block: stamp_columns(row, "creation_block_number", "creation_block_timestamp"),
        last_update_block: stamp_columns(
            row,
            "last_update_block_number",
            "last_update_block_timestamp",
        ),
    })
}

fn fraction_from_row(row: &Row) -> Result<Fraction, StoreError> {
    Ok(Fraction {
        claims_id: row.get("claims_id"),
        token_id: u256_column(row, "token_id")?,
        owner_address: opt_address_column(row, "owner_address")?,
        units: u256_column(row, "units")?,
        creation_block: stamp_columns(row, "creation_block_number", "creation_block_timestamp"),
        last_update_block: stamp_columns(
            row,
            "last_update_block_number",
            "last_update_block_timestamp",
        ),
    })
}

fn allow_list_from_row(row: &Row) -> Result<AllowListData, StoreError> {
    Ok(AllowListData {
        id: row.get("id"),
        uri: row.get("uri"),
        root: b256_column(row, "root")?,
        data: row.get("data"),
        parsed: row.get("parsed"),
    })
}

fn schema_from_row(row: &Row) -> Result<SupportedSchema, StoreError> {
    let chain_id: i64 = row.get("chain_id");
    Ok(SupportedSchema {
        id: row.get("id"),
        chain_id: chain_id as u64,
        uid: b256_column(row, "uid")?,
        schema: row.get("schema"),
        resolver: opt_address_column(row, "resolver")?,
        revocable: row.get("revocable"),
        last_block_indexed: opt_block_column(row, "last_block_indexed"),
    })
}

#[async_trait]
impl HypercertsStore for PostgresStore {
    async fn list_contract_events(&self, chain_id: u64) -> Result<Vec<ContractEvent>, StoreError> {
        let chain_id = block_i64(chain_id, "chain id")?;
        let rows = self
            .client
            .query(
                "SELECT ce.contracts_id, ce.events_id, ce.last_block_indexed, \
                        e.name AS event_name, \
                        c.chain_id, c.contract_address, c.start_block \
                 FROM contract_events ce \
                 JOIN contracts c ON c.id = ce.contracts_id \
                 JOIN events e ON e.id = ce.events_id \
                 WHERE c.chain_id = $1",
                &[&chain_id],
            )
            .await
            .map_err(pg_err)?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let chain_id: i64 = row.get("chain_id");
            let start_block: i64 = row.get("start_block");
            pairs.push(ContractEvent {
                contract: Contract {
                    id: row.get("contracts_id"),
                    chain_id: chain_id as u64,
                    contract_address: address_column(row, "contract_address")?,
                    start_block: start_block as u64,
                },
                events_id: row.get("events_id"),
                event_name: row.get("event_name"),
                last_block_indexed: opt_block_column(row, "last_block_indexed"),
            });
        }
        Ok(pairs)
    }

    async fn update_contract_event_cursor(
        &self,
        contracts_id: i64,
        events_id: i64,
        last_block_indexed: u64,
    ) -> Result<(), StoreError> {
        let block = block_i64(last_block_indexed, "block number")?;
        self.client
            .execute(
                "UPDATE contract_events \
                 SET last_block_indexed = GREATEST(COALESCE(last_block_indexed, 0), $3) \
                 WHERE contracts_id = $1 AND events_id = $2",
                &[&contracts_id, &events_id, &block],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn list_supported_schemas(
        &self,
        chain_id: u64,
    ) -> Result<Vec<SupportedSchema>, StoreError> {
        let chain_id = block_i64(chain_id, "chain id")?;
        let rows = self
            .client
            .query(
                "SELECT id, chain_id, uid, schema, resolver, revocable, last_block_indexed \
                 FROM supported_schemas WHERE chain_id = $1",
                &[&chain_id],
            )
            .await
            .map_err(pg_err)?;
        rows.iter().map(schema_from_row).collect()
    }

    async fn find_supported_schema(
        &self,
        chain_id: u64,
        uid: B256,
    ) -> Result<Option<SupportedSchema>, StoreError> {
        let chain_id = block_i64(chain_id, "chain id")?;
        let uid = format!("0x{}", hex::encode(uid));
        let rows = self
            .client
            .query(
                "SELECT id, chain_id, uid, schema, resolver, revocable, last_block_indexed \
                 FROM supported_schemas WHERE chain_id = $1 AND uid = $2",
                &[&chain_id, &uid],
            )
            .await
            .map_err(pg_err)?;
        rows.first().map(schema_from_row).transpose()
    }

    async fn update_supported_schema_cursor(
        &self,
        supported_schemas_id: i64,
        last_block_indexed: u64,
    ) -> Result<(), StoreError> {
        let block = block_i64(last_block_indexed, "block number")?;
        self.client
            .execute(
                "UPDATE supported_schemas \
                 SET last_block_indexed = GREATEST(COALESCE(last_block_indexed, 0), $2) \
                 WHERE id = $1",
                &[&supported_schemas_id, &block],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn get_or_create_claim(
        &self,
        chain_id: u64,
        contract_address: Address,
        token_id: U256,
        stamp: BlockStamp,
    ) -> Result<i64, StoreError> {
        let root = token::claim_token_id(token_id);
        let hypercert_id = token::hypercert_id(chain_id, contract_address, root);
        let chain_id = block_i64(chain_id, "chain id")?;
        let block_number = block_i64(stamp.number, "block number")?;
        let block_timestamp = block_i64(stamp.timestamp, "block timestamp")?;

        // The stored procedure is atomic: concurrent callers resolving the
        // same root converge on one claim row.
        let row = self
            .client
            .query_one(
                "SELECT get_or_create_claim($1, $2, $3, $4, $5, $6) AS claims_id",
                &[
                    &chain_id,
                    &contract_address.to_checksum(None),
                    &units::to_text(root),
                    &hypercert_id,
                    &block_number,
                    &block_timestamp,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.get("claims_id"))
    }

    async fn upsert_claim(&self, claim: Claim) -> Result<i64, StoreError> {
        let creation = claim.creation_block;
        let update = claim.last_update_block;
        let row = self
            .client
            .query_one(
                "INSERT INTO claims (contracts_id, token_id, hypercert_id, creator_address, \
                                     owner_address, units, uri, \
                                     creation_block_number, creation_block_timestamp, \
                                     last_update_block_number, last_update_block_timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (contracts_id, token_id) DO UPDATE SET \
                   hypercert_id = EXCLUDED.hypercert_id, \
                   creator_address = COALESCE(EXCLUDED.creator_address, claims.creator_address), \
                   owner_address = COALESCE(EXCLUDED.owner_address, claims.owner_address), \
                   units = EXCLUDED.units, \
                   uri = COALESCE(EXCLUDED.uri, claims.uri), \
                   creation_block_number = COALESCE(claims.creation_block_number, EXCLUDED.creation_block_number), \
                   creation_block_timestamp = COALESCE(claims.creation_block_timestamp, EXCLUDED.creation_block_timestamp), \
                   last_update_block_number = EXCLUDED.last_update_block_number, \
                   last_update_block_timestamp = EXCLUDED.last_update_block_timestamp \
                 RETURNING id",
                &[
                    &claim.contracts_id,
                    &units::to_text(claim.token_id),
                    &claim.hypercert_id,
                    &claim.creator_address.map(|a| a.to_checksum(None)),
                    &claim.owner_address.map(|a| a.to_checksum(None)),
                    &units::to_text(claim.units),
                    &claim.uri,
                    &creation
                        .map(|s| block_i64(s.number, "block number"))
                        .transpose()?,
                    &creation
                        .map(|s| block_i64(s.timestamp, "block timestamp"))
                        .transpose()?,
                    &update
                        .map(|s| block_i64(s.number, "block number"))
                        .transpose()?,
                    &update
                        .map(|s| block_i64(s.timestamp, "block timestamp"))
                        .transpose()?,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.get("id"))
    }

    async fn get_claim(
        &self,
        contracts_id: i64,
        token_id: U256,
    ) -> Result<Option<(i64, Claim)>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT id, contracts_id, token_id, hypercert_id, creator_address, \
                        owner_address, units, uri, \
                        creation_block_number, creation_block_timestamp, \
                        last_update_block_number, last_update_block_timestamp \
                 FROM claims WHERE contracts_id = $1 AND token_id = $2",
                &[&contracts_id, &units::to_text(token_id)],
            )
            .await
            .map_err(pg_err)?;
        rows.first()
            .map(|row| Ok((row.get("id"), claim_from_row(row)?)))
            .transpose()
    }

    async fn set_claim_owner(
        &self,
        claims_id: i64,
        owner: Address,
        stamp: BlockStamp,
    ) -> Result<(), StoreError> {
        self.client
            .execute(
                "UPDATE claims SET owner_address = $2, \
                        last_update_block_number = $3, last_update_block_timestamp = $4 \
                 WHERE id = $1",
                &[
                    &claims_id,
                    &owner.to_checksum(None),
                    &block_i64(stamp.number, "block number")?,
                    &block_i64(stamp.timestamp, "block timestamp")?,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn get_fraction(
        &self,
        claims_id: i64,
        token_id: U256,
    ) -> Result<Option<Fraction>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT claims_id, token_id, owner_address, units, \
                        creation_block_number, creation_block_timestamp, \
                        last_update_block_number, last_update_block_timestamp \
                 FROM fractions WHERE claims_id = $1 AND token_id = $2",
                &[&claims_id, &units::to_text(token_id)],
            )
            .await
            .map_err(pg_err)?;
        rows.first().map(fraction_from_row).transpose()
    }

    async fn upsert_fractions(&self, fractions: Vec<Fraction>) -> Result<(), StoreError> {
        for fraction in fractions {
            let creation = fraction.creation_block;
            let update = fraction.last_update_block;
            self.client
                .execute(
                    "INSERT INTO fractions (claims_id, token_id, owner_address, units, \
                                            creation_block_number, creation_block_timestamp, \
                                            last_update_block_number, last_update_block_timestamp) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (claims_id, token_id) DO UPDATE SET \
                       owner_address = COALESCE(EXCLUDED.owner_address, fractions.owner_address), \
                       units = EXCLUDED.units, \
                       creation_block_number = COALESCE(fractions.creation_block_number, EXCLUDED.creation_block_number), \
                       creation_block_timestamp = COALESCE(fractions.creation_block_timestamp, EXCLUDED.creation_block_timestamp), \
                       last_update_block_number = EXCLUDED.last_update_block_number, \
                       last_update_block_timestamp = EXCLUDED.last_update_block_timestamp",
                    &[
                        &fraction.claims_id,
                        &units::to_text(fraction.token_id),
                        &fraction.owner_address.map(|a| a.to_checksum(None)),
                        &units::to_text(fraction.units),
                        &creation
                            .map(|s| block_i64(s.number, "block number"))
                            .transpose()?,
                        &creation
                            .map(|s| block_i64(s.timestamp, "block timestamp"))
                            .transpose()?,
                        &update
                            .map(|s| block_i64(s.number, "block number"))
                            .transpose()?,
                        &update
                            .map(|s| block_i64(s.timestamp, "block timestamp"))
                            .transpose()?,
                    ],
                )
                .await
                .map_err(pg_err)?;
        }
        Ok(())
    }

    async fn fractions_for_claim(&self, claims_id: i64) -> Result<Vec<Fraction>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT claims_id, token_id, owner_address, units, \
                        creation_block_number, creation_block_timestamp, \
                        last_update_block_number, last_update_block_timestamp \
                 FROM fractions WHERE claims_id = $1",
                &[&claims_id],
            )
            .await
            .map_err(pg_err)?;
        rows.iter().map(fraction_from_row).collect()
    }

    async fn upsert_allow_list_data(
        &self,
        root: B256,
        uri: Option<String>,
        data: serde_json::Value,
    ) -> Result<i64, StoreError> {
        let root = format!("0x{}", hex::encode(root));
        let row = self
            .client
            .query_one(
                "INSERT INTO allow_list_data (root, uri, data, parsed) \
                 VALUES ($1, $2, $3, false) \
                 ON CONFLICT (root) DO UPDATE SET \
                   uri = COALESCE(EXCLUDED.uri, allow_list_data.uri), \
                   data = EXCLUDED.data \
                 RETURNING id",
                &[&root, &uri, &data],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.get("id"))
    }

    async fn find_allow_list_by_root(
        &self,
        root: B256,
    ) -> Result<Option<AllowListData>, StoreError> {
        let root = format!("0x{}", hex::encode(root));
        let rows = self
            .client
            .query(
                "SELECT id, uri, root, data, parsed FROM allow_list_data WHERE root = $1",
                &[&root],
            )
            .await
            .map_err(pg_err)?;
        rows.first().map(allow_list_from_row).transpose()
    }

    async fn link_claim_allow_list(
        &self,
        claims_id: i64,
        allow_list_data_id: i64,
    ) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO claim_allow_lists (claims_id, allow_list_data_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&claims_id, &allow_list_data_id],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn allow_list_for_claim(
        &self,
        claims_id: i64,
    ) -> Result<Option<AllowListData>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT a.id, a.uri, a.root, a.data, a.parsed \
                 FROM allow_list_data a \
                 JOIN claim_allow_lists l ON l.allow_list_data_id = a.id \
                 WHERE l.claims_id = $1",
                &[&claims_id],
            )
            .await
            .map_err(pg_err)?;
        rows.first().map(allow_list_from_row).transpose()
    }

    async fn insert_allow_list_records(
        &self,
        records: Vec<AllowListRecord>,
    ) -> Result<(), StoreError> {
        for record in records {
            self.client
                .execute(
                    "INSERT INTO allow_list_records (allow_list_data_id, entry, leaf, \
                                                     user_address, units, proof, claimed) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     ON CONFLICT (allow_list_data_id, entry) DO UPDATE SET \
                       leaf = EXCLUDED.leaf, \
                       user_address = EXCLUDED.user_address, \
                       units = EXCLUDED.units, \
                       proof = EXCLUDED.proof, \
                       claimed = allow_list_records.claimed OR EXCLUDED.claimed",
                    &[
                        &record.allow_list_data_id,
                        &block_i64(record.entry, "entry index")?,
                        &format!("0x{}", hex::encode(record.leaf)),
                        &record.user_address.to_checksum(None),
                        &units::to_text(record.units),
                        &proof_json(&record.proof),
                        &record.claimed,
                    ],
                )
                .await
                .map_err(pg_err)?;
        }
        Ok(())
    }

    async fn mark_allow_list_parsed(&self, allow_list_data_id: i64) -> Result<(), StoreError> {
        self.client
            .execute(
                "UPDATE allow_list_data SET parsed = true WHERE id = $1",
                &[&allow_list_data_id],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn mark_leaf_claimed(
        &self,
        allow_list_data_id: i64,
        leaf: B256,
        claimant: Address,
    ) -> Result<LeafClaimOutcome, StoreError> {
        let leaf = format!("0x{}", hex::encode(leaf));
        let claimant = claimant.to_checksum(None);

        let updated = self
            .client
            .execute(
                "UPDATE allow_list_records SET claimed = true \
                 WHERE id IN ( \
                   SELECT id FROM allow_list_records \
                   WHERE allow_list_data_id = $1 AND leaf = $2 \
                     AND user_address = $3 AND claimed = false \
                   ORDER BY entry LIMIT 1)",
                &[&allow_list_data_id, &leaf, &claimant],
            )
            .await
            .map_err(pg_err)?;
        if updated == 1 {
            return Ok(LeafClaimOutcome::Claimed);
        }

        let claimed = self
            .client
            .query(
                "SELECT 1 FROM allow_list_records \
                 WHERE allow_list_data_id = $1 AND leaf = $2 \
                   AND user_address = $3 AND claimed = true",
                &[&allow_list_data_id, &leaf, &claimant],
            )
            .await
            .map_err(pg_err)?;
        if claimed.is_empty() {
            Ok(LeafClaimOutcome::NoMatch)
        } else {
            Ok(LeafClaimOutcome::AlreadyClaimed)
        }
    }

    async fn upsert_attestation(&self, attestation: Attestation) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO attestations (supported_schemas_id, uid, chain_id, \
                                           contract_address, token_id, recipient_address, \
                                           attester_address, data, \
                                           creation_block_number, creation_block_timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (supported_schemas_id, uid) DO UPDATE SET \
                   data = EXCLUDED.data, \
                   recipient_address = EXCLUDED.recipient_address, \
                   attester_address = EXCLUDED.attester_address",
                &[
                    &attestation.supported_schemas_id,
                    &format!("0x{}", hex::encode(attestation.uid)),
                    &block_i64(attestation.chain_id, "chain id")?,
                    &attestation.contract_address.to_checksum(None),
                    &units::to_text(attestation.token_id),
                    &attestation.recipient.to_checksum(None),
                    &attestation.attester.to_checksum(None),
                    &attestation.data,
                    &block_i64(attestation.block.number, "block number")?,
                    &block_i64(attestation.block.timestamp, "block timestamp")?,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn upsert_sale(&self, sale: Sale) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO sales (transaction_hash, log_index, buyer, seller, strategy_id, \
                                    currency, collection, item_ids, amounts, hypercert_id, \
                                    fee_recipients, fee_amounts, \
                                    creation_block_number, creation_block_timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                 ON CONFLICT (transaction_hash, log_index) DO UPDATE SET \
                   buyer = EXCLUDED.buyer, \
                   seller = EXCLUDED.seller, \
                   strategy_id = EXCLUDED.strategy_id, \
                   currency = EXCLUDED.currency, \
                   collection = EXCLUDED.collection, \
                   item_ids = EXCLUDED.item_ids, \
                   amounts = EXCLUDED.amounts, \
                   hypercert_id = EXCLUDED.hypercert_id, \
                   fee_recipients = EXCLUDED.fee_recipients, \
                   fee_amounts = EXCLUDED.fee_amounts",
                &[
                    &format!("0x{}", hex::encode(sale.transaction_hash)),
                    &block_i64(sale.log_index, "log index")?,
                    &sale.buyer.to_checksum(None),
                    &sale.seller.to_checksum(None),
                    &block_i64(sale.strategy_id, "strategy id")?,
                    &sale.currency.to_checksum(None),
                    &sale.collection.to_checksum(None),
                    &u256_vec_json(&sale.item_ids),
                    &u256_vec_json(&sale.amounts),
                    &sale.hypercert_id,
                    &address_vec_json(&sale.fee_recipients),
                    &u256_vec_json(&sale.fee_amounts),
                    &block_i64(sale.block.number, "block number")?,
                    &block_i64(sale.block.timestamp, "block timestamp")?,
                ],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn list_open_orders_overlapping(
        &self,
        chain_id: u64,
        item_ids: &[U256],
    ) -> Result<Vec<MarketplaceOrder>, StoreError> {
        let chain_id = block_i64(chain_id, "chain id")?;
        let ids: Vec<String> = item_ids.iter().map(|id| id.to_string()).collect();
        let rows = self
            .client
            .query(
                "SELECT id, chain_id, signer, collection, item_ids, order_nonce, \
                        invalidated, validator_codes \
                 FROM marketplace_orders \
                 WHERE chain_id = $1 AND invalidated = false AND item_ids ?| $2",
                &[&chain_id, &ids],
            )
            .await
            .map_err(pg_err)?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let chain_id: i64 = row.get("chain_id");
            let item_ids: serde_json::Value = row.get("item_ids");
            let validator_codes: serde_json::Value = row.get("validator_codes");
            orders.push(MarketplaceOrder {
                id: row.get("id"),
                chain_id: chain_id as u64,
                signer: address_column(row, "signer")?,
                collection: address_column(row, "collection")?,
                item_ids: u256_vec_from_json(&item_ids)?,
                order_nonce: u256_column(row, "order_nonce")?,
                invalidated: row.get("invalidated"),
                validator_codes: validator_codes
                    .as_array()
                    .map(|codes| {
                        codes
                            .iter()
                            .filter_map(|code| code.as_u64())
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default(),
            });
        }
        Ok(orders)
    }

    async fn invalidate_order(
        &self,
        order_id: &str,
        validator_codes: Vec<u64>,
    ) -> Result<(), StoreError> {
        let codes = serde_json::Value::Array(
            validator_codes
                .iter()
                .map(|code| serde_json::Value::from(*code))
                .collect(),
        );
        self.client
            .execute(
                "UPDATE marketplace_orders SET invalidated = true, validator_codes = $2 \
                 WHERE id = $1",
                &[&order_id, &codes],
            )
            .await
            .map_err(pg_err)?;
        Ok(())
    }
}
