//! Transfer records
//!
//! Reads the `transfers.data` section of a team or league payload and splits
//! it into a club's incoming and outgoing moves. Fees are kept as the text
//! upstream shows; they are never converted to amounts.

use std::fmt;

use serde::Serialize;

use crate::cache::View;

/// One player move between two clubs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub player_id: Option<String>,
    pub player_name: String,
    pub transfer_date: Option<String>,
    pub from_id: Option<String>,
    pub from_name: String,
    pub to_id: Option<String>,
    pub to_name: String,
    /// Fee text as shown upstream, e.g. `€45M` or `Free transfer`
    pub fee: Option<String>,
    pub on_loan: bool,
    pub contract_extension: bool,
}

/// Id fields arrive as numbers or strings
fn id_of(view: &View) -> Option<String> {
    view.as_str()
        .map(str::to_string)
        .or_else(|| view.as_u64().map(|id| id.to_string()))
}

fn flag(record: &View, field: &str) -> bool {
    record.get(field).and_then(View::as_bool).unwrap_or(false)
}

impl Transfer {
    /// Parses one transfer record; `None` when the player name is missing
    pub fn from_view(record: &View) -> Option<Self> {
        let text = |field: &str| record.get(field).and_then(View::as_str).map(str::to_string);
        let fee = record.get("fee").and_then(|fee| {
            fee.as_str()
                .or_else(|| fee.get("value").and_then(View::as_str))
                .or_else(|| fee.get("feeText").and_then(View::as_str))
                .map(str::to_string)
        });

        Some(Self {
            player_id: record.get("playerId").and_then(id_of),
            player_name: text("name")?,
            transfer_date: text("transferDate"),
            from_id: record.get("fromClubId").and_then(id_of),
            from_name: text("fromClub").unwrap_or_default(),
            to_id: record.get("toClubId").and_then(id_of),
            to_name: text("toClub").unwrap_or_default(),
            fee,
            on_loan: flag(record, "onLoan"),
            contract_extension: flag(record, "contractExtension"),
        })
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.player_name, self.from_name, self.to_name)?;
        if let Some(fee) = &self.fee {
            write!(f, " ({fee})")?;
        }
        Ok(())
    }
}

/// Every transfer record in a payload's `transfers.data`
///
/// The section is either a flat list or an object of lists (for example
/// `{"Players in": [...], "Players out": [...]}`); both are flattened.
pub fn transfer_records(payload: &View) -> Vec<Transfer> {
    let Some(data) = payload.pointer("/transfers/data") else {
        return Vec::new();
    };
    let records: Vec<&View> = match data {
        View::Sequence(items) => items.iter().collect(),
        View::Mapping(_) => data.entries().flat_map(|(_, list)| list.items()).collect(),
        _ => Vec::new(),
    };
    records.into_iter().filter_map(Transfer::from_view).collect()
}

/// Which records to keep for a club
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFilter {
    pub incoming: bool,
    pub outgoing: bool,
    pub include_loans: bool,
    pub include_extensions: bool,
}

impl Default for TransferFilter {
    fn default() -> Self {
        Self {
            incoming: true,
            outgoing: false,
            include_loans: false,
            include_extensions: false,
        }
    }
}

impl TransferFilter {
    fn keeps(&self, transfer: &Transfer) -> bool {
        (self.include_loans || !transfer.on_loan)
            && (self.include_extensions || !transfer.contract_extension)
    }
}

/// A club's transfers, split by direction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClubTransfers {
    pub incoming: Vec<Transfer>,
    pub outgoing: Vec<Transfer>,
}

impl ClubTransfers {
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }
}

/// Splits `records` into moves to and from `club_id`, applying `filter`
///
/// Duplicates (the same record listed under several sections) are dropped.
pub fn club_transfers(records: &[Transfer], club_id: &str, filter: TransferFilter) -> ClubTransfers {
    let mut club = ClubTransfers::default();
    for transfer in records.iter().filter(|t| filter.keeps(t)) {
        if filter.incoming
            && transfer.to_id.as_deref() == Some(club_id)
            && !club.incoming.contains(transfer)
        {
            club.incoming.push(transfer.clone());
        }
        if filter.outgoing
            && transfer.from_id.as_deref() == Some(club_id)
            && !club.outgoing.contains(transfer)
        {
            club.outgoing.push(transfer.clone());
        }
    }
    club
}
