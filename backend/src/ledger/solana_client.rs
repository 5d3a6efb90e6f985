use std::fmt::Display;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use solana_client::{rpc_client::RpcClient, rpc_config::CommitmentConfig};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature, Signer},
    transaction::Transaction,
};

use super::{LedgerClient, Operation, TransactionRequest};
use crate::error::SubscriptionError;
use crate::model::{OwnerId, ReceiptId, SubscriptionRecord, TxHandle};

// System program ID
const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
const RECORD_SEED: &[u8] = b"record";
const RECEIPT_SEED: &[u8] = b"receipt";
// discriminator(8) + owner(32) + start_time(8) + locked_amount(8)
const RECORD_ACCOUNT_LEN: usize = 8 + 32 + 8 + 8;

/// Ledger client talking to the deployed subscription program over Solana RPC.
pub struct SolanaLedger {
    rpc_client: RpcClient,
    authority_keypair: Keypair,
    program_id: Pubkey,
}

impl SolanaLedger {
    /// Connect with an RPC URL, the subscriber keypair file and the program id.
    pub fn new(rpc_url: &str, keypair_path: &str, program_id: &str) -> Result<Self, SubscriptionError> {
        let authority_keypair = read_keypair_file(keypair_path).map_err(|e| {
            SubscriptionError::InvalidConfig(format!("failed to read keypair {keypair_path}: {e}"))
        })?;
        Self::with_keypair(rpc_url, authority_keypair, program_id)
    }

    pub fn with_keypair(
        rpc_url: &str,
        authority_keypair: Keypair,
        program_id: &str,
    ) -> Result<Self, SubscriptionError> {
        let rpc_client =
            RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed());
        Ok(Self {
            rpc_client,
            authority_keypair,
            program_id: parse_pubkey(program_id)?,
        })
    }

    /// PDA holding the record for `receipt` (must match the on-chain program).
    fn record_pda(&self, receipt: &ReceiptId) -> Pubkey {
        Pubkey::find_program_address(&[RECORD_SEED, receipt.as_str().as_bytes()], &self.program_id).0
    }

    fn receipt_mint_pda(&self, policy: &Pubkey, receipt: &ReceiptId) -> Pubkey {
        Pubkey::find_program_address(
            &[RECEIPT_SEED, policy.as_ref(), receipt.as_str().as_bytes()],
            &self.program_id,
        )
        .0
    }

    fn instruction_for(
        &self,
        op: &Operation,
        request: &TransactionRequest,
    ) -> Result<Instruction, SubscriptionError> {
        let authority = self.authority_keypair.pubkey();
        let unlocking = request.operations.iter().find_map(|candidate| match candidate {
            Operation::UnlockRecord { receipt } => Some(receipt),
            _ => None,
        });

        let (name, data, accounts) = match op {
            Operation::LockAsset {
                destination,
                asset,
                amount,
                datum,
            } => {
                let receipt = ReceiptId::derive(&datum.owner, datum.start_time)?;
                let mut data = amount.to_le_bytes().to_vec();
                data.extend_from_slice(datum.owner.as_bytes());
                data.extend_from_slice(&datum.start_time.to_le_bytes());
                let accounts = vec![
                    AccountMeta::new(self.record_pda(&receipt), false),
                    AccountMeta::new(authority, true),
                    AccountMeta::new(parse_pubkey(&destination.0)?, false),
                    AccountMeta::new_readonly(parse_pubkey(&asset.0)?, false),
                    AccountMeta::new_readonly(parse_pubkey(SYSTEM_PROGRAM_ID)?, false),
                ];
                ("lock_asset", data, accounts)
            }
            Operation::UnlockRecord { receipt } => {
                let data = request.valid_from.unwrap_or_default().to_le_bytes().to_vec();
                let accounts = vec![
                    AccountMeta::new(self.record_pda(receipt), false),
                    AccountMeta::new(authority, true),
                ];
                ("unlock_record", data, accounts)
            }
            Operation::PayAsset {
                recipient,
                asset,
                amount,
            } => {
                let mut accounts = Vec::with_capacity(4);
                if let Some(receipt) = unlocking {
                    accounts.push(AccountMeta::new(self.record_pda(receipt), false));
                }
                accounts.push(AccountMeta::new(parse_pubkey(&recipient.0)?, false));
                accounts.push(AccountMeta::new_readonly(parse_pubkey(&asset.0)?, false));
                accounts.push(AccountMeta::new(authority, true));
                ("pay_asset", amount.to_le_bytes().to_vec(), accounts)
            }
            Operation::MintToken {
                policy,
                receipt,
                recipient,
            } => {
                let policy = parse_pubkey(&policy.0)?;
                let accounts = vec![
                    AccountMeta::new(self.record_pda(receipt), false),
                    AccountMeta::new(self.receipt_mint_pda(&policy, receipt), false),
                    AccountMeta::new(parse_pubkey(&recipient.0)?, false),
                    AccountMeta::new(authority, true),
                    AccountMeta::new_readonly(parse_pubkey(SYSTEM_PROGRAM_ID)?, false),
                ];
                ("mint_receipt", encode_name(receipt), accounts)
            }
            Operation::BurnToken { policy, receipt } => {
                let policy = parse_pubkey(&policy.0)?;
                let accounts = vec![
                    AccountMeta::new(self.record_pda(receipt), false),
                    AccountMeta::new(self.receipt_mint_pda(&policy, receipt), false),
                    AccountMeta::new(authority, true),
                ];
                ("burn_receipt", encode_name(receipt), accounts)
            }
        };

        let mut instruction_data = anchor_discriminator(name).to_vec();
        instruction_data.extend_from_slice(&data);
        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data: instruction_data,
        })
    }

    /// Sign with the authority keypair and wait for confirmation.
    async fn send_transaction(&self, instructions: &[Instruction]) -> Result<Signature, String> {
        let recent_blockhash = self
            .rpc_client
            .get_latest_blockhash()
            .map_err(|e| e.to_string())?;
        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.authority_keypair.pubkey()),
            &[&self.authority_keypair],
            recent_blockhash,
        );

        self.rpc_client
            .send_and_confirm_transaction(&transaction)
            .map_err(|e| e.to_string())
    }
}

impl LedgerClient for SolanaLedger {
    fn signer(&self) -> OwnerId {
        OwnerId::from_public_key(self.authority_keypair.pubkey().to_bytes())
    }

    async fn resolve_record(
        &self,
        receipt: &ReceiptId,
    ) -> Result<Option<SubscriptionRecord>, SubscriptionError> {
        let pda = self.record_pda(receipt);
        let response = self
            .rpc_client
            .get_account_with_commitment(&pda, self.rpc_client.commitment())
            .map_err(|e| SubscriptionError::SubmissionFailure(e.to_string()))?;

        match response.value {
            Some(account) => decode_record(&account.data, receipt).map(Some),
            None => Ok(None),
        }
    }

    async fn submit(&self, request: TransactionRequest) -> Result<TxHandle, SubscriptionError> {
        if let Some(outpoint) = &request.reference_script {
            tracing::debug!(%outpoint, "programs are referenced by id; ignoring reference script");
        }

        let instructions = request
            .operations
            .iter()
            .map(|op| self.instruction_for(op, &request))
            .collect::<Result<Vec<_>, _>>()?;

        let signature = self
            .send_transaction(&instructions)
            .await
            .map_err(|e| classify_rpc_error(e, &request))?;

        tracing::info!(%signature, program = %self.program_id, "transaction confirmed");
        Ok(TxHandle(signature.to_string()))
    }
}

/// First 8 bytes of `sha256("global:<name>")`, the Anchor instruction selector.
pub fn anchor_discriminator(name: &str) -> [u8; 8] {
    prefix_hash(&format!("global:{name}"))
}

fn account_discriminator(name: &str) -> [u8; 8] {
    prefix_hash(&format!("account:{name}"))
}

fn prefix_hash(preimage: &str) -> [u8; 8] {
    let digest = Sha256::digest(preimage.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Borsh-style string: u32 LE length followed by the bytes.
fn encode_name(receipt: &ReceiptId) -> Vec<u8> {
    let name = receipt.as_str().as_bytes();
    let mut data = (name.len() as u32).to_le_bytes().to_vec();
    data.extend_from_slice(name);
    data
}

/// Decode a record account: discriminator + owner + start_time + locked_amount.
pub fn decode_record(data: &[u8], receipt: &ReceiptId) -> Result<SubscriptionRecord, SubscriptionError> {
    if data.len() < RECORD_ACCOUNT_LEN {
        return Err(SubscriptionError::SubmissionFailure(format!(
            "record account too short: {} bytes",
            data.len()
        )));
    }
    if data[..8] != account_discriminator("SubscriptionRecord") {
        return Err(SubscriptionError::SubmissionFailure(
            "account is not a subscription record".into(),
        ));
    }

    let mut owner = [0u8; 32];
    owner.copy_from_slice(&data[8..40]);
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[40..48]);
    let start_time = u64::from_le_bytes(word);
    word.copy_from_slice(&data[48..56]);
    let locked_amount = u64::from_le_bytes(word);

    Ok(SubscriptionRecord {
        owner: OwnerId::from_public_key(owner),
        start_time,
        locked_amount,
        receipt_id: receipt.clone(),
    })
}

/// Accepts base58 (native) or 64-char hex pubkeys.
fn parse_pubkey(value: &str) -> Result<Pubkey, SubscriptionError> {
    if let Ok(key) = Pubkey::from_str(value) {
        return Ok(key);
    }
    hex::decode(value)
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .map(Pubkey::new_from_array)
        .ok_or_else(|| SubscriptionError::InvalidConfig(format!("not a valid pubkey: {value}")))
}

fn classify_rpc_error(message: impl Display, request: &TransactionRequest) -> SubscriptionError {
    let message = message.to_string();
    if message.to_lowercase().contains("insufficient funds") {
        let lock = request.operations.iter().find_map(|op| match op {
            Operation::LockAsset { asset, amount, .. } => Some((asset.clone(), *amount)),
            _ => None,
        });
        if let Some((asset, needed)) = lock {
            return SubscriptionError::InsufficientFunds { asset, needed };
        }
    }
    SubscriptionError::SubmissionFailure(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, AssetId, SubscriptionDatum};

    fn random_key() -> Pubkey {
        Keypair::new().pubkey()
    }

    fn ledger() -> SolanaLedger {
        let program = random_key().to_string();
        SolanaLedger::with_keypair("http://localhost:8899", Keypair::new(), &program).unwrap()
    }

    #[test]
    fn discriminator_matches_anchor_idl() {
        assert_eq!(
            anchor_discriminator("initialize"),
            [175, 175, 109, 31, 13, 152, 155, 237]
        );
        assert_eq!(
            anchor_discriminator("update_root"),
            [58, 195, 57, 246, 116, 198, 170, 138]
        );
    }

    #[test]
    fn decodes_record_account() {
        let owner = [7u8; 32];
        let receipt = ReceiptId::derive(&OwnerId::from_public_key(owner), 1_234).unwrap();
        let mut data = account_discriminator("SubscriptionRecord").to_vec();
        data.extend_from_slice(&owner);
        data.extend_from_slice(&1_234u64.to_le_bytes());
        data.extend_from_slice(&10_000u64.to_le_bytes());

        let record = decode_record(&data, &receipt).unwrap();
        assert_eq!(record.owner, OwnerId::from_public_key(owner));
        assert_eq!(record.start_time, 1_234);
        assert_eq!(record.locked_amount, 10_000);
        assert_eq!(record.receipt_id, receipt);
    }

    #[test]
    fn rejects_foreign_accounts() {
        let receipt = ReceiptId::derive(&OwnerId::from_public_key([1; 32]), 1).unwrap();
        assert!(decode_record(&[0u8; 10], &receipt).is_err());
        assert!(decode_record(&[0u8; RECORD_ACCOUNT_LEN], &receipt).is_err());
    }

    #[test]
    fn pubkeys_parse_from_base58_and_hex() {
        let key = random_key();
        assert_eq!(parse_pubkey(&key.to_string()).unwrap(), key);
        assert_eq!(parse_pubkey(&hex::encode(key.to_bytes())).unwrap(), key);
        assert!(parse_pubkey("not-a-key").is_err());
    }

    #[test]
    fn lock_instruction_carries_amount_and_datum() {
        let ledger = ledger();
        let owner = ledger.signer();
        let request = TransactionRequest::new().push(Operation::LockAsset {
            destination: Address(random_key().to_string()),
            asset: AssetId(random_key().to_string()),
            amount: 10_000,
            datum: SubscriptionDatum {
                owner,
                start_time: 99,
            },
        });

        let ix = ledger.instruction_for(&request.operations[0], &request).unwrap();
        assert_eq!(ix.program_id, ledger.program_id);
        assert_eq!(&ix.data[..8], &anchor_discriminator("lock_asset"));
        assert_eq!(&ix.data[8..16], &10_000u64.to_le_bytes());
        assert_eq!(&ix.data[16..48], owner.as_bytes());
        assert_eq!(&ix.data[48..56], &99u64.to_le_bytes());
        assert!(ix.accounts[1].is_signer);
    }

    #[test]
    fn payout_instruction_references_unlocked_record() {
        let ledger = ledger();
        let receipt = ReceiptId::derive(&ledger.signer(), 5).unwrap();
        let request = TransactionRequest::new()
            .push(Operation::UnlockRecord {
                receipt: receipt.clone(),
            })
            .push(Operation::PayAsset {
                recipient: Address::of_owner(&ledger.signer()),
                asset: AssetId(random_key().to_string()),
                amount: 7_000,
            })
            .valid_from(42);

        let unlock = ledger.instruction_for(&request.operations[0], &request).unwrap();
        assert_eq!(&unlock.data[8..], &42u64.to_le_bytes());

        let pay = ledger.instruction_for(&request.operations[1], &request).unwrap();
        assert_eq!(pay.accounts[0].pubkey, ledger.record_pda(&receipt));
        assert_eq!(pay.accounts[1].pubkey, ledger.authority_keypair.pubkey());
        assert_eq!(&pay.data[8..], &7_000u64.to_le_bytes());
    }

    #[test]
    fn insufficient_funds_message_is_classified() {
        let request = TransactionRequest::new().push(Operation::LockAsset {
            destination: Address("vault".into()),
            asset: AssetId("stake".into()),
            amount: 10_000,
            datum: SubscriptionDatum {
                owner: OwnerId::from_public_key([1; 32]),
                start_time: 0,
            },
        });
        let err = classify_rpc_error("Error processing Instruction 0: insufficient funds", &request);
        assert!(matches!(err, SubscriptionError::InsufficientFunds { needed: 10_000, .. }));

        let err = classify_rpc_error("blockhash not found", &request);
        assert!(matches!(err, SubscriptionError::SubmissionFailure(_)));
    }
}
