//!
//! Token ledger: earnings summaries, awards and withdrawals.
//!

use super::Invalid;
use crate::ODM::models::*;
use crate::ODM::store::{Credit, TotalsDelta};
use chrono::{Datelike, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodEarnings {
    pub amount: f64,
    pub transactions: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub total_earnings: f64,
    /// Pending and completed withdrawals
    pub withdrawn: f64,
    pub pending_withdrawals: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EarningsSummary {
    pub daily: PeriodEarnings,
    pub weekly: PeriodEarnings,
    pub total: BalanceSummary,
}

/// Local midnight of `date`, as UTC
fn local_midnight(date: NaiveDate) -> Timestamp {
    let midnight = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(value) => value.with_timezone(&chrono::Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&chrono::Utc),
        // midnight skipped by a DST change
        LocalResult::None => (midnight + Duration::hours(1)).and_utc(),
    }
}

pub fn start_of_today(now: chrono::DateTime<Local>) -> Timestamp {
    local_midnight(now.date_naive())
}

/// Monday 00:00 of the current week, server local time
pub fn start_of_week(now: chrono::DateTime<Local>) -> Timestamp {
    let today = now.date_naive();
    let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    local_midnight(monday)
}

fn counts_as_withdrawn(transaction: &Transaction) -> bool {
    transaction.kind == TransactionType::Withdrawal
        && matches!(transaction.status, TransactionStatus::Pending | TransactionStatus::Completed)
}

pub fn balance(mapper: &Mapper, transactions: &[Transaction]) -> BalanceSummary {
    let withdrawn: f64 = transactions
        .iter()
        .filter(|value| counts_as_withdrawn(value))
        .map(|value| value.amount.abs())
        .sum();
    let pending_withdrawals: f64 = transactions
        .iter()
        .filter(|value| value.kind == TransactionType::Withdrawal && value.status == TransactionStatus::Pending)
        .map(|value| value.amount.abs())
        .sum();

    BalanceSummary {
        total_earnings: mapper.total_earnings,
        withdrawn,
        pending_withdrawals,
        balance: mapper.total_earnings - withdrawn,
    }
}

fn period(transactions: &[Transaction], since: Timestamp) -> PeriodEarnings {
    let earned: Vec<&Transaction> = transactions
        .iter()
        .filter(|value| value.kind != TransactionType::Withdrawal && value.created_at >= since)
        .collect();
    PeriodEarnings {
        amount: earned.iter().map(|value| value.amount).sum(),
        transactions: earned.len() as u64,
    }
}

/// Daily, weekly and total earnings of a mapper at `now`
pub fn summarize(mapper: &Mapper, transactions: &[Transaction], now: chrono::DateTime<Local>) -> EarningsSummary {
    EarningsSummary {
        daily: period(transactions, start_of_today(now)),
        weekly: period(transactions, start_of_week(now)),
        total: balance(mapper, transactions),
    }
}

/// `WD-<millis>-<6 digits>`
pub fn withdrawal_reference(now: Timestamp) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("WD-{}-{:06}", now.timestamp_millis(), suffix)
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub amount: f64,
    pub bank_details: BankDetails,
}

/// Validates a withdrawal against the available balance and builds the PENDING transaction
pub fn withdrawal(
    id: String,
    mapper: &Mapper,
    request: &WithdrawalRequest,
    available: f64,
    now: Timestamp,
) -> Result<Transaction, Invalid> {
    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(Invalid("amount must be greater than 0".into()));
    }
    if request.amount > available {
        return Err(Invalid(format!("Insufficient balance: {:.2} available", available.max(0.0))));
    }
    let bank = &request.bank_details;
    if bank.bank_name.trim().is_empty() || bank.account_number.trim().is_empty() || bank.account_name.trim().is_empty() {
        return Err(Invalid("bankDetails requires bankName, accountNumber and accountName".into()));
    }

    Ok(Transaction {
        id,
        mapper_id: mapper.id.clone(),
        session_id: None,
        event_id: None,
        amount: -request.amount,
        kind: TransactionType::Withdrawal,
        status: TransactionStatus::Pending,
        description: format!("Withdrawal to {} ({})", bank.bank_name.trim(), bank.account_name.trim()),
        bank_details: Some(bank.clone()),
        reference: Some(withdrawal_reference(now)),
        created_at: now,
    })
}

/// Award for reporting an event, counts towards `eventsReported`
pub fn event_report_credit(id: String, mapper_id: &str, event: &Event, reward: f64, now: Timestamp) -> Credit {
    Credit {
        mapper_id: mapper_id.to_string(),
        delta: TotalsDelta { earnings: reward, events: 1, ..Default::default() },
        transaction: Some(Transaction {
            id,
            mapper_id: mapper_id.to_string(),
            session_id: None,
            event_id: Some(event.id.clone()),
            amount: reward,
            kind: TransactionType::EventReport,
            status: TransactionStatus::Completed,
            description: format!("Reported event: {}", event.title),
            bank_details: None,
            reference: None,
            created_at: now,
        }),
    }
}

/// Award for a field update on an existing event
pub fn event_update_credit(id: String, mapper_id: &str, event: &Event, status: EventStatus, reward: f64, now: Timestamp) -> Credit {
    Credit {
        mapper_id: mapper_id.to_string(),
        delta: TotalsDelta { earnings: reward, ..Default::default() },
        transaction: Some(Transaction {
            id,
            mapper_id: mapper_id.to_string(),
            session_id: None,
            event_id: Some(event.id.clone()),
            amount: reward,
            kind: TransactionType::EventReport,
            status: TransactionStatus::Completed,
            description: format!("Updated event {} to {}", event.title, status),
            bank_details: None,
            reference: None,
            created_at: now,
        }),
    }
}

/// Settlement moves only out of PENDING
pub fn can_settle(from: TransactionStatus, to: TransactionStatus) -> bool {
    from == TransactionStatus::Pending && matches!(to, TransactionStatus::Completed | TransactionStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn mapper(total: f64) -> Mapper {
        Mapper {
            id: "m1".into(),
            email: "m1@example.com".into(),
            name: "Tunde".into(),
            phone: None,
            vehicle_type: VehicleType::Motorcycle,
            status: MapperStatus::Active,
            is_live: false,
            current_location: None,
            total_earnings: total,
            total_distance: 0.0,
            total_duration: 0.0,
            events_reported: 0,
            bank_details: None,
            is_active: true,
            last_active: None,
            created_at: Utc::now(),
        }
    }

    fn entry(amount: f64, kind: TransactionType, status: TransactionStatus, at: Timestamp) -> Transaction {
        Transaction {
            id: format!("t{}", amount),
            mapper_id: "m1".into(),
            session_id: None,
            event_id: None,
            amount,
            kind,
            status,
            description: String::new(),
            bank_details: None,
            reference: None,
            created_at: at,
        }
    }

    fn bank() -> BankDetails {
        BankDetails { bank_name: "GTBank".into(), account_number: "0123456789".into(), account_name: "Tunde A".into() }
    }

    #[test]
    fn summary_splits_periods_and_reserves_pending_withdrawals() {
        let now = Local::now();
        let today = now.with_timezone(&Utc);
        let last_week = start_of_week(now) - Duration::days(2);
        let transactions = vec![
            entry(5.0, TransactionType::EventReport, TransactionStatus::Completed, today),
            entry(3.0, TransactionType::EventReport, TransactionStatus::Completed, today),
            entry(-10.0, TransactionType::Withdrawal, TransactionStatus::Pending, today),
            entry(20.0, TransactionType::Mapping, TransactionStatus::Completed, last_week),
        ];
        let summary = summarize(&mapper(100.0), &transactions, now);

        assert_eq!(summary.daily.amount, 8.0);
        assert_eq!(summary.daily.transactions, 2);
        assert_eq!(summary.weekly.amount, 8.0);
        assert_eq!(summary.total.balance, 90.0);
        assert_eq!(summary.total.pending_withdrawals, 10.0);
    }

    #[test]
    fn failed_withdrawals_release_balance() {
        let now = Utc::now();
        let transactions = vec![
            entry(-10.0, TransactionType::Withdrawal, TransactionStatus::Failed, now),
            entry(-15.0, TransactionType::Withdrawal, TransactionStatus::Completed, now),
        ];
        let summary = balance(&mapper(50.0), &transactions);
        assert_eq!(summary.withdrawn, 15.0);
        assert_eq!(summary.balance, 35.0);
    }

    #[test]
    fn week_starts_on_monday() {
        let now = Local::now();
        let start = start_of_week(now).with_timezone(&Local);
        assert_eq!(start.weekday(), chrono::Weekday::Mon);
        assert!(start <= now);
        assert!(start_of_today(now) >= start_of_week(now));
    }

    #[test]
    fn withdrawal_validates_amount_and_balance() {
        let now = Utc::now();
        let request = |amount| WithdrawalRequest { amount, bank_details: bank() };
        let owner = mapper(50.0);

        assert!(withdrawal("w".into(), &owner, &request(0.0), 50.0, now).is_err());
        assert!(withdrawal("w".into(), &owner, &request(-5.0), 50.0, now).is_err());
        assert!(withdrawal("w".into(), &owner, &request(50.01), 50.0, now).is_err());

        let transaction = withdrawal("w".into(), &owner, &request(50.0), 50.0, now).unwrap();
        assert_eq!(transaction.amount, -50.0);
        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert_eq!(transaction.kind, TransactionType::Withdrawal);
        assert!(transaction.reference.unwrap().starts_with(&format!("WD-{}-", now.timestamp_millis())));
    }

    #[test]
    fn withdrawal_requires_bank_details() {
        let mut request = WithdrawalRequest { amount: 5.0, bank_details: bank() };
        request.bank_details.account_number = " ".into();
        assert!(withdrawal("w".into(), &mapper(50.0), &request, 50.0, Utc::now()).is_err());
    }

    #[test]
    fn settlement_only_from_pending() {
        assert!(can_settle(TransactionStatus::Pending, TransactionStatus::Completed));
        assert!(can_settle(TransactionStatus::Pending, TransactionStatus::Failed));
        assert!(!can_settle(TransactionStatus::Pending, TransactionStatus::Pending));
        assert!(!can_settle(TransactionStatus::Completed, TransactionStatus::Failed));
    }
}
