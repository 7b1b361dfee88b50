/// divergence.rs — normalized lookback divergence scoring (C3)
///
/// Invoked from inside bar finalization/recalculation (C4) with the
/// in-progress/finalizing bar as `current` and the instrument×interval's
/// finalized bar history (not including `current`) as `history`.
use std::collections::VecDeque;

use crate::model::{Bar, DivergenceScores};

const DIVERGENCE_MULTIPLIER: f64 = 2.0;

/// `min(history_length, 30/interval_minutes)` bars, or `None` if fewer than
/// `5/interval_minutes` bars exist (§4.3).
fn lookback_bars(history_len: usize, interval_minutes: u32, lookback_minutes: u32) -> Option<usize> {
    let interval_minutes = interval_minutes.max(1);
    let min_bars = div_ceil(5, interval_minutes) as usize;
    if history_len < min_bars {
        return None;
    }
    let max_bars = div_ceil(lookback_minutes, interval_minutes) as usize;
    Some(history_len.min(max_bars).max(1))
}

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

fn score(primary_change: f64, secondary_change: f64) -> f64 {
    let bullish = secondary_change - DIVERGENCE_MULTIPLIER * primary_change;
    let bearish = DIVERGENCE_MULTIPLIER * primary_change - secondary_change;
    if bullish > 0.0 {
        (10.0 * bullish).min(1.0)
    } else if bearish > 0.0 {
        -(10.0 * bearish).min(1.0)
    } else {
        0.0
    }
}

/// Computes the Tier-1/Tier-2 divergence map for `current` against `history`,
/// or `None` when the lookback window doesn't yet have enough bars.
pub fn compute_divergence(
    current: &Bar,
    history: &VecDeque<Bar>,
    interval_minutes: u32,
    lookback_minutes: u32,
) -> Option<DivergenceScores> {
    let bars = lookback_bars(history.len(), interval_minutes, lookback_minutes)?;
    let start = &history[history.len() - bars];

    let close_start = start.close;
    if close_start == 0.0 {
        return None;
    }
    let price_change = (current.close - close_start) / close_start;

    let window: Vec<&Bar> = history.iter().skip(history.len() - bars).collect();
    let volume_in_window: i64 = window.iter().map(|b| b.volume).sum();
    let large_volume_in_window: i64 = window
        .iter()
        .map(|b| b.raw_scores.large_buy_volume + b.raw_scores.large_sell_volume)
        .sum();

    let guarded = |raw_diff: f64, denom: i64| raw_diff / denom.max(1) as f64;

    let cur = &current.raw_scores;
    let cvd_change = guarded((cur.cvd_5m - start.raw_scores.cvd_5m) as f64, volume_in_window);
    let obv_change = guarded((cur.obv - start.raw_scores.obv) as f64, volume_in_window);
    let lvc_change = guarded(
        (cur.lvc_delta - start.raw_scores.lvc_delta) as f64,
        large_volume_in_window,
    );
    let rsi_change = (cur.rsi - start.raw_scores.rsi) / 100.0;
    let mfi_change = (cur.mfi - start.raw_scores.mfi) / 100.0;
    let clv_change = cur.clv_smoothed - start.raw_scores.clv_smoothed;

    Some(DivergenceScores {
        price_vs_lvc: score(price_change, lvc_change),
        price_vs_cvd: score(price_change, cvd_change),
        price_vs_obv: score(price_change, obv_change),
        price_vs_rsi: score(price_change, rsi_change),
        price_vs_mfi: score(price_change, mfi_change),
        price_vs_clv: score(price_change, clv_change),
        lvc_vs_cvd: score(lvc_change, cvd_change),
        lvc_vs_obv: score(lvc_change, obv_change),
        lvc_vs_rsi: score(lvc_change, rsi_change),
        lvc_vs_mfi: score(lvc_change, mfi_change),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawScores;
    use chrono::Utc;

    fn bar(close: f64, cvd: i64, obv: i64, volume: i64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            stock_name: "TEST".into(),
            instrument_token: 1,
            interval_minutes: 5,
            open: close,
            high: close,
            low: close,
            close,
            volume,
            bar_vwap: close,
            session_vwap: None,
            bar_count: 1,
            raw_scores: RawScores { cvd_5m: cvd, obv, ..Default::default() },
        }
    }

    #[test]
    fn empty_scores_below_minimum_history() {
        let history = VecDeque::new();
        let current = bar(100.0, 0, 0, 0);
        assert!(compute_divergence(&current, &history, 5, 30).is_none());
    }

    #[test]
    fn bullish_divergence_when_price_falls_but_obv_rises() {
        let mut history = VecDeque::new();
        history.push_back(bar(100.0, 0, 0, 100));
        let current = bar(95.0, 0, 500, 100);
        let div = compute_divergence(&current, &history, 5, 30).unwrap();
        assert!(div.price_vs_obv > 0.0, "expected bullish score, got {}", div.price_vs_obv);
    }
}
