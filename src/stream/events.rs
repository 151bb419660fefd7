//! Typed views over the raw per-block event batches delivered by an event source.

/// Event emitted by wasm smart contracts
pub(crate) const WASM_EVENT: &str = "wasm";

/// Event emitted when a smart contract's code is migrated
pub(crate) const MIGRATE_EVENT: &str = "migrate";

/// Event emitted by the marker module for coin transfers outside the contract
pub(crate) const MARKER_TRANSFER_EVENT: &str = "provenance.marker.v1.EventMarkerTransfer";

const CONTRACT_ADDRESS_KEY: &str = "_contract_address";
const ACTION_KEY: &str = "action";

/// One chain event as delivered by the event source
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamEvent {
    pub(crate) event_type: String,
    pub(crate) tx_hash: String,
    pub(crate) height: u64,
    pub(crate) attributes: Vec<(String, String)>,
}

impl StreamEvent {
    /// Value of the first attribute named `key`, or `""` if the event has none
    fn attribute(&self, key: &str) -> String {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Same as [`Self::attribute`], with typed-event JSON quoting removed
    fn unquoted_attribute(&self, key: &str) -> String {
        let value = self.attribute(key);
        if value.starts_with('"') {
            serde_json::from_str::<String>(&value).unwrap_or(value)
        } else {
            value
        }
    }

    fn is_contract_event(&self, event_type: &str, contract_address: &str) -> bool {
        self.event_type == event_type && self.attribute(CONTRACT_ADDRESS_KEY) == contract_address
    }

    fn is_contract_action(&self, contract_address: &str, action: &str) -> bool {
        self.is_contract_event(WASM_EVENT, contract_address) && self.attribute(ACTION_KEY) == action
    }
}

/// All events of interest for a single block height
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EventBatch {
    pub(crate) height: u64,
    pub(crate) events: Vec<StreamEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mint {
    pub(crate) tx_hash: String,
    pub(crate) height: u64,
    pub(crate) member_id: String,
    pub(crate) amount: String,
    pub(crate) denom: String,
    pub(crate) withdraw_denom: String,
    pub(crate) withdraw_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Burn {
    pub(crate) tx_hash: String,
    pub(crate) height: u64,
    pub(crate) member_id: String,
    pub(crate) amount: String,
    pub(crate) denom: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Redemption {
    pub(crate) tx_hash: String,
    pub(crate) height: u64,
    pub(crate) member_id: String,
    pub(crate) amount: String,
    pub(crate) denom: String,
}

/// Contract-level transfer. A transfer to the managed address is how coin is burned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Transfer {
    pub(crate) tx_hash: String,
    pub(crate) height: u64,
    pub(crate) sender: String,
    pub(crate) recipient: String,
    pub(crate) amount: String,
    pub(crate) denom: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Migration {
    pub(crate) tx_hash: String,
    pub(crate) height: u64,
    pub(crate) code_id: String,
}

/// Marker-module transfer of any coin between two addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MarkerTransfer {
    pub(crate) tx_hash: String,
    pub(crate) height: u64,
    pub(crate) from_address: String,
    pub(crate) to_address: String,
    pub(crate) amount: String,
    pub(crate) denom: String,
}

impl EventBatch {
    fn contract_actions<'a>(
        &'a self,
        contract_address: &'a str,
        action: &'a str,
    ) -> impl Iterator<Item = &'a StreamEvent> + 'a {
        self.events
            .iter()
            .filter(move |e| e.is_contract_action(contract_address, action))
    }

    pub(crate) fn mints(&self, contract_address: &str) -> Vec<Mint> {
        self.contract_actions(contract_address, "mint")
            .map(|e| Mint {
                tx_hash: e.tx_hash.clone(),
                height: e.height,
                member_id: e.attribute("member_id"),
                amount: e.attribute("amount"),
                denom: e.attribute("denom"),
                withdraw_denom: e.attribute("withdraw_denom"),
                withdraw_address: e.attribute("withdraw_address"),
            })
            .collect()
    }

    pub(crate) fn burns(&self, contract_address: &str) -> Vec<Burn> {
        self.contract_actions(contract_address, "burn")
            .map(|e| Burn {
                tx_hash: e.tx_hash.clone(),
                height: e.height,
                member_id: e.attribute("member_id"),
                amount: e.attribute("amount"),
                denom: e.attribute("denom"),
            })
            .collect()
    }

    pub(crate) fn redemptions(&self, contract_address: &str) -> Vec<Redemption> {
        self.contract_actions(contract_address, "redeem")
            .map(|e| Redemption {
                tx_hash: e.tx_hash.clone(),
                height: e.height,
                member_id: e.attribute("member_id"),
                amount: e.attribute("amount"),
                denom: e.attribute("denom"),
            })
            .collect()
    }

    pub(crate) fn transfers(&self, contract_address: &str) -> Vec<Transfer> {
        self.contract_actions(contract_address, "transfer")
            .map(|e| Transfer {
                tx_hash: e.tx_hash.clone(),
                height: e.height,
                sender: e.attribute("sender"),
                recipient: e.attribute("recipient"),
                amount: e.attribute("amount"),
                denom: e.attribute("denom"),
            })
            .collect()
    }

    pub(crate) fn migrations(&self, contract_address: &str) -> Vec<Migration> {
        self.events
            .iter()
            .filter(|e| e.is_contract_event(MIGRATE_EVENT, contract_address))
            .map(|e| Migration {
                tx_hash: e.tx_hash.clone(),
                height: e.height,
                code_id: e.attribute("code_id"),
            })
            .collect()
    }

    pub(crate) fn marker_transfers(&self) -> Vec<MarkerTransfer> {
        self.events
            .iter()
            .filter(|e| e.event_type == MARKER_TRANSFER_EVENT)
            .map(|e| MarkerTransfer {
                tx_hash: e.tx_hash.clone(),
                height: e.height,
                from_address: e.unquoted_attribute("from_address"),
                to_address: e.unquoted_attribute("to_address"),
                amount: e.unquoted_attribute("amount"),
                denom: e.unquoted_attribute("denom"),
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn test_contract_actions_are_split_by_action() {
        let batch = batch(vec![
            mint_event("tx1", "bank1", "tp1alice"),
            contract_event("tx2", "burn", &[("member_id", "bank1"), ("amount", "5")]),
            contract_event("tx3", "redeem", &[("member_id", "bank1"), ("amount", "6")]),
            transfer_event("tx4", "tp1alice", "tp1manager", "usdf.c"),
        ]);

        let mints = batch.mints(CONTRACT);
        assert_eq!(mints.len(), 1);
        assert_eq!(mints[0].withdraw_address, "tp1alice");
        assert_eq!(mints[0].withdraw_denom, "usdf.c");
        assert_eq!(batch.burns(CONTRACT)[0].amount, "5");
        assert_eq!(batch.redemptions(CONTRACT)[0].tx_hash, "tx3");
        assert_eq!(batch.transfers(CONTRACT)[0].recipient, "tp1manager");
    }

    #[test]
    fn test_other_contracts_are_ignored() {
        let batch = batch(vec![
            mint_event("tx1", "bank1", "tp1alice"),
            migrate_event("tx2", "7"),
        ]);

        assert!(batch.mints("tp1other").is_empty());
        assert!(batch.migrations("tp1other").is_empty());
        assert_eq!(batch.migrations(CONTRACT)[0].code_id, "7");
    }

    #[test]
    fn test_missing_attributes_decode_empty() {
        let batch = batch(vec![contract_event("tx1", "transfer", &[("sender", "tp1alice")])]);

        let transfer = &batch.transfers(CONTRACT)[0];
        assert_eq!(transfer.sender, "tp1alice");
        assert_eq!(transfer.recipient, "");
        assert_eq!(transfer.amount, "");
    }

    #[test]
    fn test_marker_transfer_values_are_unquoted() {
        let batch = batch(vec![
            marker_transfer_event("tx1", "tp1alice", "tp1bob", "usdf.c"),
            event(MARKER_TRANSFER_EVENT, "tx2", &[("from_address", "tp1plain")]),
        ]);

        let transfers = batch.marker_transfers();
        assert_eq!(transfers[0].from_address, "tp1alice");
        assert_eq!(transfers[0].to_address, "tp1bob");
        assert_eq!(transfers[0].amount, "250");
        assert_eq!(transfers[0].denom, "usdf.c");
        assert_eq!(transfers[1].from_address, "tp1plain");
        assert_eq!(transfers[1].denom, "");
    }
}
