use chrono::{Duration, Utc};
use financial_persona_engine::{
    models::{
        Account, AccountSubtype, AccountType, GenerateOptions, Liability, PaymentChannel,
        Transaction,
    },
    personas::default_catalog,
    pipeline::InsightsPipeline,
    recommendations::default_recommendation_catalog,
    store::{ConsentStore, InMemoryConsentStore, InMemoryDataStore, InMemoryRecommendationSink},
    trace::{InMemoryTraceStore, TraceStore},
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Financial Persona Engine demo starting");

    let data_store = Arc::new(InMemoryDataStore::new());
    let consent_store = Arc::new(InMemoryConsentStore::new());
    let trace_store = Arc::new(InMemoryTraceStore::new());
    let sink = Arc::new(InMemoryRecommendationSink::new());

    let persona_catalog = Arc::new(default_catalog());
    let recommendation_catalog =
        Arc::new(default_recommendation_catalog(&persona_catalog)?);

    let user_id = Uuid::new_v4();
    seed_demo_user(&data_store, user_id).await;
    consent_store.grant(user_id).await?;

    let pipeline = InsightsPipeline::new(
        data_store,
        consent_store,
        trace_store.clone(),
        persona_catalog,
        recommendation_catalog,
    )
    .with_sink(sink);

    let options = GenerateOptions {
        credit_score: Some(705),
        annual_income: Some(58_000.0),
        ..Default::default()
    };

    info!(%user_id, "Running insights pipeline");

    let outcome = pipeline
        .generate_recommendations(user_id, 180, &options)
        .await?;

    println!("\n=== PERSONA ASSIGNMENT ===");
    println!("Primary persona: {}", outcome.assignment.primary_persona);
    println!("Risk level: {}", outcome.assignment.risk_level);
    println!("Rationale: {}", outcome.assignment.rationale);
    for score in &outcome.assignment.assigned_personas {
        println!(
            "  {} -> {} criteria, {:.1} points ({:.0}%)",
            score.persona_id, score.matched_criteria, score.total_points, score.percentage
        );
    }

    println!("\n=== EDUCATION ===");
    for (i, rec) in outcome.education_items.iter().enumerate() {
        println!("  {}: [{:?}] {}", i + 1, rec.priority, rec.title);
        println!("     {}", rec.body);
        if let Some(impact) = &rec.expected_impact {
            println!("     Impact: {}", impact);
        }
    }

    println!("\n=== PARTNER OFFERS ===");
    for (i, rec) in outcome.partner_offers.iter().enumerate() {
        println!("  {}: {}", i + 1, rec.title);
        if let Some(disclosure) = &rec.disclosure {
            println!("     {}", disclosure);
        }
    }

    let traces = trace_store.list_for_user(user_id).await?;
    println!("\n=== DECISION TRACES ===");
    for trace in &traces {
        println!(
            "  {} -> {} (hash {})",
            trace.trace_id,
            trace.primary_persona,
            &trace.snapshot_hash[..12]
        );
    }

    Ok(())
}

/// One user with a nearly maxed card, a handful of streaming subscriptions,
/// and biweekly payroll.
async fn seed_demo_user(store: &InMemoryDataStore, user_id: Uuid) {
    let today = Utc::now().date_naive();
    let card_id = Uuid::new_v4();
    let checking_id = Uuid::new_v4();

    let accounts = vec![
        Account {
            account_id: card_id,
            user_id,
            name: "Rewards Card".to_string(),
            account_type: AccountType::Credit,
            subtype: AccountSubtype::CreditCard,
            currency: "USD".to_string(),
            available_balance: None,
            current_balance: -934.0,
            credit_limit: Some(1000.0),
            interest_rate: None,
            next_payment_due: Some(today + Duration::days(12)),
            mask: Some("4321".to_string()),
        },
        Account {
            account_id: checking_id,
            user_id,
            name: "Everyday Checking".to_string(),
            account_type: AccountType::Depository,
            subtype: AccountSubtype::Checking,
            currency: "USD".to_string(),
            available_balance: Some(1840.0),
            current_balance: 1840.0,
            credit_limit: None,
            interest_rate: None,
            next_payment_due: None,
            mask: Some("0042".to_string()),
        },
    ];

    let mut transactions = Vec::new();
    let mut tx = |account_id: Uuid,
                  days_ago: i64,
                  amount: f64,
                  merchant: Option<&str>,
                  primary: &str,
                  detailed: &str,
                  channel: PaymentChannel| {
        transactions.push(Transaction {
            transaction_id: Uuid::new_v4(),
            account_id,
            date: today - Duration::days(days_ago),
            amount,
            merchant_name: merchant.map(|m| m.to_string()),
            category_primary: primary.to_string(),
            category_detailed: detailed.to_string(),
            payment_channel: channel,
            pending: false,
        });
    };

    // Biweekly payroll
    tx(checking_id, 3, 1650.0, Some("Acme Corp"), "income", "income_wages", PaymentChannel::Ach);
    tx(checking_id, 17, 1650.0, Some("Acme Corp"), "income", "income_wages", PaymentChannel::Ach);

    // Streaming subscriptions, monthly cadence over three months
    for merchant in ["StreamFlix", "TuneBox", "CloudDrive"] {
        for month in 0..3 {
            tx(
                checking_id,
                4 + month * 30,
                -14.99,
                Some(merchant),
                "entertainment",
                "entertainment_streaming",
                PaymentChannel::Online,
            );
        }
    }

    // Card interest and a minimum-only payment pattern
    tx(card_id, 6, -24.50, None, "interest", "interest_charged", PaymentChannel::Other);
    tx(card_id, 8, 35.0, None, "transfer", "credit_card_payment", PaymentChannel::Online);
    tx(card_id, 38, 35.0, None, "transfer", "credit_card_payment", PaymentChannel::Online);

    // Everyday spending
    tx(checking_id, 2, -86.40, Some("FreshMart"), "groceries", "groceries", PaymentChannel::InStore);
    tx(checking_id, 9, -42.10, Some("FreshMart"), "groceries", "groceries", PaymentChannel::InStore);
    tx(checking_id, 12, -1200.0, Some("Oak Street Apts"), "rent", "rent", PaymentChannel::Ach);

    let liabilities = vec![Liability {
        liability_id: Uuid::new_v4(),
        account_id: card_id,
        apr: Some(26.99),
        minimum_payment: Some(35.0),
        last_payment_amount: Some(35.0),
        last_payment_date: Some(today - Duration::days(8)),
        next_payment_date: Some(today + Duration::days(12)),
        is_overdue: false,
        statement_balance: Some(934.0),
    }];

    store.seed_accounts(user_id, accounts).await;
    store.seed_transactions(user_id, transactions).await;
    store.seed_liabilities(user_id, liabilities).await;
}
