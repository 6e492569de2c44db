use super::atomic::{read_json, write_json};
use super::ProjectStore;
use crate::error::Result;
use crate::types::{Contract, ContractType};
use std::fs;
use tracing::warn;

impl ProjectStore {
    /// Register a contract. Unique by id; re-registration overwrites
    /// (last writer wins).
    pub fn register_contract(&self, contract: &Contract) -> Result<()> {
        let path = self.layout().contract_path(&contract.contract_id);
        write_json(&path, contract)
    }

    /// Contracts matching the optional type and id-substring filters,
    /// ordered by registration time.
    pub fn get_contracts(
        &self,
        contract_type: Option<ContractType>,
        id_contains: Option<&str>,
    ) -> Result<Vec<Contract>> {
        let dir = self.layout().contracts_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut contracts = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match read_json::<Contract>(&path) {
                Ok(contract) => {
                    let type_ok =
                        contract_type.is_none_or(|wanted| contract.contract_type == wanted);
                    let id_ok =
                        id_contains.is_none_or(|needle| contract.contract_id.contains(needle));
                    if type_ok && id_ok {
                        contracts.push(contract);
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable contract");
                }
            }
        }
        contracts.sort_by_key(|contract| contract.registered_at);
        Ok(contracts)
    }
}
