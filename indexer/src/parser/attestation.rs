use alloy_dyn_abi::{DecodedEvent, DynSolType, DynSolValue, FunctionExt, JsonAbiExt};
use alloy_json_abi::Function;
use alloy_primitives::{Address, Bytes, U256};
use error_stack::{Report, Result, ResultExt};
use tracing::debug;

use hypercerts_core::{validation, Attestation, Fact, LogPosition, StampedFact};
use hypercerts_evm::ChainReader;

use crate::{
    error::{IndexerError, IndexerErrorResultExt},
    parser::ParseContext,
};

/// `getAttestation(bytes32)` as exposed by the attestation service.
const GET_ATTESTATION: &str = "function getAttestation(bytes32 uid) view returns \
     ((bytes32,bytes32,uint64,uint64,uint64,bytes32,address,address,bool,bytes))";

/// `Attested(address indexed recipient, address indexed attester, bytes32
/// uid, bytes32 indexed schema)`
///
/// The attestation body is resolved from chain by uid and decoded against
/// the schema string associated with the `schema` topic. Attestations for
/// schemas this indexer does not know are discarded silently.
pub(super) async fn parse(
    decoded: &DecodedEvent,
    position: LogPosition,
    ctx: &ParseContext,
    reader: &dyn ChainReader,
) -> Result<Vec<StampedFact>, IndexerError> {
    let recipient = validation::expect_address("recipient", decoded.indexed.first())
        .validation("Attested recipient")?;
    let attester = validation::expect_address("attester", decoded.indexed.get(1))
        .validation("Attested attester")?;
    let schema_uid =
        validation::expect_b256("schema", decoded.indexed.get(2)).validation("Attested schema")?;
    let uid = validation::expect_b256("uid", decoded.body.first()).validation("Attested uid")?;

    let Some(schema) = ctx.schemas.get(&schema_uid) else {
        debug!(schema = %schema_uid, "attestation for unknown schema, skipping");
        return Ok(Vec::new());
    };
    let Some(schema_string) = schema.schema.as_deref() else {
        debug!(schema = %schema_uid, "schema has no decoder string, skipping");
        return Ok(Vec::new());
    };

    let body = resolve_attestation_body(ctx.contract_address, uid, reader).await?;
    let (data, chain_id, contract_address, token_id) = decode_schema_data(schema_string, &body)?;

    let attestation = Attestation {
        supported_schemas_id: schema.id,
        uid,
        chain_id,
        contract_address,
        token_id,
        recipient,
        attester,
        data,
        block: position_stamp(position),
    };

    Ok(vec![StampedFact::new(position, Fact::Attested(attestation))])
}

fn position_stamp(position: LogPosition) -> hypercerts_core::entity::BlockStamp {
    hypercerts_core::entity::BlockStamp {
        number: position.block_number,
        timestamp: position.block_timestamp,
    }
}

/// Fetches the attestation struct from the attestation service contract and
/// returns its raw `data` payload.
async fn resolve_attestation_body(
    eas_address: Address,
    uid: alloy_primitives::B256,
    reader: &dyn ChainReader,
) -> Result<Vec<u8>, IndexerError> {
    let function = Function::parse(GET_ATTESTATION)
        .configuration("failed to parse getAttestation signature")?;
    let call_data = function
        .abi_encode_input(&[DynSolValue::FixedBytes(uid, 32)])
        .validation("failed to encode getAttestation call")?;

    let output = reader
        .read_contract(eas_address, Bytes::from(call_data))
        .await
        .temporary("failed to resolve attestation body")?;

    let outputs = function
        .abi_decode_output(&output, true)
        .validation("failed to decode getAttestation output")?;
    let fields =
        validation::expect_tuple("attestation", outputs.first()).validation("attestation body")?;

    // Field 9 is the schema-encoded payload.
    validation::expect_bytes("data", fields.get(9)).validation("attestation data")
}

/// Decodes an attestation payload against a schema string of the form
/// `"uint256 chain_id,address contract_address,uint256 token_id,…"`.
///
/// Returns the full decoded payload as JSON plus the three fields every
/// claim attestation must carry.
fn decode_schema_data(
    schema: &str,
    data: &[u8],
) -> Result<(serde_json::Value, u64, Address, U256), IndexerError> {
    let mut types = Vec::new();
    let mut names = Vec::new();
    for field in schema.split(',') {
        let field = field.trim();
        let Some((ty, name)) = field.rsplit_once(' ') else {
            return Err(Report::new(IndexerError::Validation))
                .attach_printable(format!("malformed schema field: {field}"));
        };
        let ty = DynSolType::parse(ty.trim())
            .validation("unparsable schema field type")
            .attach_printable_lazy(|| format!("field: {field}"))?;
        types.push(ty);
        names.push(name.trim().to_string());
    }

    let tuple = DynSolType::Tuple(types);
    let decoded = tuple
        .abi_decode_params(data)
        .validation("attestation payload does not match schema")?;
    let DynSolValue::Tuple(values) = decoded else {
        return Err(Report::new(IndexerError::Validation))
            .attach_printable("schema decoding did not yield a tuple");
    };

    let mut object = serde_json::Map::new();
    let mut chain_id = None;
    let mut contract_address = None;
    let mut token_id = None;
    for (name, value) in names.iter().zip(&values) {
        match name.as_str() {
            "chain_id" => {
                chain_id = Some(
                    validation::expect_u64("chain_id", Some(value))
                        .validation("attestation chain_id")?,
                )
            }
            "contract_address" => {
                contract_address = Some(
                    validation::expect_address("contract_address", Some(value))
                        .validation("attestation contract_address")?,
                )
            }
            "token_id" => {
                token_id = Some(
                    validation::expect_uint("token_id", Some(value))
                        .validation("attestation token_id")?,
                )
            }
            _ => {}
        }
        object.insert(name.clone(), render_value(value));
    }

    let chain_id = chain_id
        .ok_or(IndexerError::Validation)
        .attach_printable("schema has no chain_id field")?;
    let contract_address = contract_address
        .ok_or(IndexerError::Validation)
        .attach_printable("schema has no contract_address field")?;
    let token_id = token_id
        .ok_or(IndexerError::Validation)
        .attach_printable("schema has no token_id field")?;

    Ok((
        serde_json::Value::Object(object),
        chain_id,
        contract_address,
        token_id,
    ))
}

/// Renders a decoded value for JSON storage. Numbers exceeding native
/// ranges become decimal strings.
fn render_value(value: &DynSolValue) -> serde_json::Value {
    match value {
        DynSolValue::Address(address) => serde_json::Value::String(address.to_checksum(None)),
        DynSolValue::Bool(value) => serde_json::Value::Bool(*value),
        DynSolValue::String(value) => serde_json::Value::String(value.clone()),
        DynSolValue::Uint(value, _) => serde_json::Value::String(value.to_string()),
        DynSolValue::Int(value, _) => serde_json::Value::String(value.to_string()),
        DynSolValue::Bytes(bytes) => {
            serde_json::Value::String(format!("0x{}", hex::encode(bytes)))
        }
        DynSolValue::FixedBytes(word, size) => {
            serde_json::Value::String(format!("0x{}", hex::encode(&word.as_slice()[..*size])))
        }
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
            serde_json::Value::Array(values.iter().map(render_value).collect())
        }
        DynSolValue::Tuple(values) => {
            serde_json::Value::Array(values.iter().map(render_value).collect())
        }
        _ => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{Address, Bytes, B256, U256};
    use assert_matches::assert_matches;

    use hypercerts_core::{Fact, SupportedSchema};

    use crate::{
        parser::testing::{test_log, test_position, FakeReader},
        parser::ParseContext,
        registry::EventKind,
    };

    const SCHEMA: &str = "uint256 chain_id,address contract_address,uint256 token_id,\
                          uint8 evaluate_basic,string comments";

    fn schema_row(uid: B256) -> SupportedSchema {
        SupportedSchema {
            id: 11,
            chain_id: 10,
            uid,
            schema: Some(SCHEMA.to_string()),
            resolver: None,
            revocable: true,
            last_block_indexed: None,
        }
    }

    fn context(uid: B256, eas: Address) -> ParseContext {
        let mut schemas = HashMap::new();
        schemas.insert(uid, schema_row(uid));
        ParseContext {
            chain_id: 10,
            contracts_id: 1,
            contract_address: eas,
            events_id: 2,
            schemas,
        }
    }

    fn encoded_attestation(uid: B256, recipient: Address, attester: Address) -> Bytes {
        let payload = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(10u64), 256),
            DynSolValue::Address(Address::with_last_byte(3)),
            DynSolValue::Uint(U256::from(5u64) << 128, 256),
            DynSolValue::Uint(U256::from(2u64), 8),
            DynSolValue::String("solid work".to_string()),
        ])
        .abi_encode_params();

        let body = DynSolValue::Tuple(vec![
            DynSolValue::FixedBytes(uid, 32),
            DynSolValue::FixedBytes(B256::with_last_byte(1), 32),
            DynSolValue::Uint(U256::from(0u64), 64),
            DynSolValue::Uint(U256::from(0u64), 64),
            DynSolValue::Uint(U256::from(0u64), 64),
            DynSolValue::FixedBytes(B256::ZERO, 32),
            DynSolValue::Address(recipient),
            DynSolValue::Address(attester),
            DynSolValue::Bool(true),
            DynSolValue::Bytes(payload),
        ]);
        Bytes::from(DynSolValue::Tuple(vec![body]).abi_encode_params())
    }

    fn address_topic(address: Address) -> B256 {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(address.as_slice());
        word.into()
    }

    #[tokio::test]
    async fn test_parse_attested_decodes_payload() {
        let filter = EventKind::Attested.filter().unwrap();
        let eas = Address::with_last_byte(8);
        let recipient = Address::with_last_byte(4);
        let attester = Address::with_last_byte(5);
        let schema_uid = B256::with_last_byte(0xAA);
        let uid = B256::with_last_byte(0xBB);
        let position = test_position(40, 0);

        let log = test_log(
            eas,
            vec![
                filter.topic0(),
                address_topic(recipient),
                address_topic(attester),
                schema_uid,
            ],
            &[DynSolValue::FixedBytes(uid, 32)],
            position,
        );

        let reader = FakeReader {
            call_output: Some(encoded_attestation(uid, recipient, attester)),
            ..Default::default()
        };
        let ctx = context(schema_uid, eas);
        let decoded = filter.decode_log(&log.log).unwrap();
        let facts = super::parse(&decoded, position, &ctx, &reader).await.unwrap();

        assert_eq!(facts.len(), 1);
        assert_matches!(
            &facts[0].fact,
            Fact::Attested(attestation) => {
                assert_eq!(attestation.uid, uid);
                assert_eq!(attestation.supported_schemas_id, 11);
                assert_eq!(attestation.chain_id, 10);
                assert_eq!(attestation.token_id, U256::from(5u64) << 128);
                assert_eq!(attestation.data["comments"], "solid work");
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_schema_is_discarded() {
        let filter = EventKind::Attested.filter().unwrap();
        let eas = Address::with_last_byte(8);
        let position = test_position(40, 0);

        let log = test_log(
            eas,
            vec![
                filter.topic0(),
                address_topic(Address::with_last_byte(4)),
                address_topic(Address::with_last_byte(5)),
                B256::with_last_byte(0xCC),
            ],
            &[DynSolValue::FixedBytes(B256::with_last_byte(0xBB), 32)],
            position,
        );

        let reader = FakeReader::default();
        let ctx = context(B256::with_last_byte(0xAA), eas);
        let decoded = filter.decode_log(&log.log).unwrap();
        let facts = super::parse(&decoded, position, &ctx, &reader).await.unwrap();
        assert!(facts.is_empty());
    }
}
