use brk_accrual::{AccrualConfig, DayCountBasis};
use brk_calendar::Holiday;
use brk_ledger::{AccrualPeriod, RatePct};
use brk_testkit::{date, money, Harness, EXCHANGE};

fn tradeable(holidays: Vec<Holiday>) -> anyhow::Result<Harness> {
    Harness::with_config(
        AccrualConfig {
            default_rate: RatePct::from_percent(10),
            basis: DayCountBasis::Tradeable,
        },
        holidays,
    )
}

fn june() -> AccrualPeriod {
    AccrualPeriod::month(2024, 6).unwrap()
}

/// June 2024 has 20 weekdays; a lot bought on Monday the 10th holds 15.
#[tokio::test]
async fn weekends_do_not_count() -> anyhow::Result<()> {
    let h = tradeable(Vec::new())?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-06-10").await?;

    let computed = h.engine.preview(1, &june()).await?;
    let d = &computed.details[0];
    assert_eq!(d.total_days_in_period, 20);
    assert_eq!(d.holding_days, 15);
    assert_eq!(d.brokerage_amount, money("75"));
    Ok(())
}

/// Exchange holidays drop out of both the holding days and the period.
#[tokio::test]
async fn holidays_do_not_count() -> anyhow::Result<()> {
    let h = tradeable(vec![Holiday::new(EXCHANGE, date("2024-06-17"), "Bakri Id")])?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-06-10").await?;

    let computed = h.engine.preview(1, &june()).await?;
    let d = &computed.details[0];
    assert_eq!(d.total_days_in_period, 19);
    assert_eq!(d.holding_days, 14);
    assert_eq!(d.brokerage_amount, money("73.684211"));
    Ok(())
}

/// A holiday on another exchange changes nothing.
#[tokio::test]
async fn holidays_are_per_exchange() -> anyhow::Result<()> {
    let h = tradeable(vec![Holiday::new("BSE", date("2024-06-17"), "")])?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-06-10").await?;

    let computed = h.engine.preview(1, &june()).await?;
    assert_eq!(computed.details[0].total_days_in_period, 20);
    assert_eq!(computed.calculation.brokerage_amount, money("75"));
    Ok(())
}

/// Quarter periods use the cached quarter count.
#[tokio::test]
async fn quarter_days_come_from_the_calendar_cache() -> anyhow::Result<()> {
    let h = tradeable(Vec::new())?;
    h.seed(1, "INFY", "10");
    h.buy(1, "INFY", 100, "10", "2024-04-01").await?;

    let q2 = AccrualPeriod::parse("2024-Q2")?;
    let computed = h.engine.preview(1, &q2).await?;
    let expected = h.calendar.tradeable_days_in_quarter(EXCHANGE, 2024, 2)?;
    assert_eq!(computed.details[0].total_days_in_period, i64::from(expected));
    assert_eq!(computed.details[0].holding_days, i64::from(expected));
    assert_eq!(computed.calculation.brokerage_amount, money("100"));
    assert_eq!(h.calendar.cached_quarters(), 1);
    Ok(())
}
