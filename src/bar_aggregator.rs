/// bar_aggregator.rs — per (instrument, interval) time-bucketed OHLCV and
/// indicator aggregation, with finalization on bucket rollover (C4).
use std::collections::VecDeque;

use chrono::{DateTime, Timelike, Utc};
use tracing::debug;

use crate::divergence::compute_divergence;
use crate::model::{Bar, EnrichedTick, RawScores, Structure};

const BAR_HISTORY_CAP: usize = 200;
const CLV_SMOOTHING_PERIOD: usize = 3;
const STRUCTURE_EPS: f64 = 1e-9;

/// `bucket_start = timestamp` floored to seconds=0 and minutes snapped down
/// to a multiple of `interval_minutes` within the hour (§4.4).
fn bucket_start(timestamp: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let truncated = timestamp.with_second(0).unwrap().with_nanosecond(0).unwrap();
    let snapped_minute = (truncated.minute() / interval_minutes) * interval_minutes;
    truncated.with_minute(snapped_minute).unwrap()
}

fn bars_for(minutes: u32, interval_minutes: u32) -> usize {
    let bars = (minutes + interval_minutes - 1) / interval_minutes.max(1);
    bars.max(1) as usize
}

fn push_capped<T>(deque: &mut VecDeque<T>, value: T, cap: usize) {
    if deque.len() >= cap {
        deque.pop_front();
    }
    deque.push_back(value);
}

fn calculate_obv(current_close: f64, prev_close: f64, volume: i64, prev_obv: i64) -> i64 {
    if current_close > prev_close {
        prev_obv + volume
    } else if current_close < prev_close {
        prev_obv - volume
    } else {
        prev_obv
    }
}

pub struct BarAggregator {
    stock_name: String,
    instrument_token: i64,
    interval_minutes: u32,
    indicator_period: usize,
    divergence_lookback_minutes: u32,

    building: Option<Bar>,
    bar_total_price_volume: f64,
    bar_history: VecDeque<Bar>,

    delta_history_5m: VecDeque<i64>,
    delta_history_10m: VecDeque<i64>,
    delta_history_30m: VecDeque<i64>,

    prev_session_pv: Option<f64>,
    prev_cum_vol: Option<i64>,

    avg_gain: f64,
    avg_loss: f64,
    is_rsi_initialized: bool,

    money_flow_history: VecDeque<(f64, i8)>,
    clv_history: VecDeque<f64>,
}

impl BarAggregator {
    pub fn new(
        stock_name: String,
        instrument_token: i64,
        interval_minutes: u32,
        indicator_period: usize,
        divergence_lookback_minutes: u32,
    ) -> Self {
        Self {
            stock_name,
            instrument_token,
            interval_minutes,
            indicator_period,
            divergence_lookback_minutes,
            building: None,
            bar_total_price_volume: 0.0,
            bar_history: VecDeque::with_capacity(BAR_HISTORY_CAP),
            delta_history_5m: VecDeque::with_capacity(bars_for(5, interval_minutes)),
            delta_history_10m: VecDeque::with_capacity(bars_for(10, interval_minutes)),
            delta_history_30m: VecDeque::with_capacity(bars_for(30, interval_minutes)),
            prev_session_pv: None,
            prev_cum_vol: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            is_rsi_initialized: false,
            money_flow_history: VecDeque::with_capacity(indicator_period),
            clv_history: VecDeque::with_capacity(CLV_SMOOTHING_PERIOD),
        }
    }

    /// The live, observably-up-to-date in-progress bar, if any.
    pub fn building_bar(&self) -> Option<&Bar> {
        self.building.as_ref()
    }

    /// Feeds one enriched tick; returns the bar that just rolled off, if any.
    pub fn add_tick(&mut self, tick: &EnrichedTick) -> Option<Bar> {
        let last_price = tick.last_price()?;
        let bucket = bucket_start(tick.timestamp(), self.interval_minutes);

        let needs_new_bar = match &self.building {
            None => true,
            Some(b) => b.timestamp != bucket,
        };

        let mut completed = None;
        if needs_new_bar {
            if self.building.is_some() {
                completed = Some(self.finalize_bar());
            }
            self.start_new_bar(bucket, last_price, tick.tick.average_traded_price);
        }
        self.update_bar_data(tick, last_price);
        completed
    }

    fn start_new_bar(&mut self, bucket: DateTime<Utc>, last_price: f64, session_vwap: Option<f64>) {
        self.building = Some(Bar {
            timestamp: bucket,
            stock_name: self.stock_name.clone(),
            instrument_token: self.instrument_token,
            interval_minutes: self.interval_minutes,
            open: last_price,
            high: last_price,
            low: last_price,
            close: last_price,
            volume: 0,
            bar_vwap: 0.0,
            session_vwap,
            bar_count: self.bar_history.len() + 1,
            raw_scores: RawScores::default(),
        });
        self.bar_total_price_volume = 0.0;
        self.recalculate_bar_features();
    }

    fn update_bar_data(&mut self, tick: &EnrichedTick, last_price: f64) {
        {
            let bar = self.building.as_mut().expect("bar started above");
            if last_price > bar.high {
                bar.high = last_price;
            }
            if last_price < bar.low {
                bar.low = last_price;
            }
            bar.close = last_price;
            bar.session_vwap = tick.tick.average_traded_price;
        }

        if let (Some(vol_traded), Some(avg_price)) =
            (tick.tick.volume_traded, tick.tick.average_traded_price)
        {
            let session_pv = avg_price * vol_traded as f64;
            let (dv, dpv) = match (self.prev_session_pv, self.prev_cum_vol) {
                (Some(prev_pv), Some(prev_vol)) => {
                    ((vol_traded - prev_vol).max(0), (session_pv - prev_pv).max(0.0))
                }
                _ => (tick.tick_volume, last_price * tick.tick_volume as f64),
            };
            self.prev_session_pv = Some(session_pv);
            self.prev_cum_vol = Some(vol_traded);

            if dv > 0 {
                let bar = self.building.as_mut().expect("bar started above");
                bar.volume += dv;
                self.bar_total_price_volume += dpv;
                if bar.volume > 0 {
                    bar.bar_vwap = self.bar_total_price_volume / bar.volume as f64;
                }
            }
        }

        if tick.tick_volume > 0 {
            let bar = self.building.as_mut().expect("bar started above");
            let rs = &mut bar.raw_scores;
            rs.bar_delta += tick.tick_volume * tick.trade_sign as i64;
            if tick.is_large_trade {
                if tick.trade_sign == 1 {
                    rs.large_buy_volume += tick.tick_volume;
                } else {
                    rs.large_sell_volume += tick.tick_volume;
                }
            }
            if tick.is_buy_absorption {
                rs.passive_buy_volume += tick.tick_volume;
            }
            if tick.is_sell_absorption {
                rs.passive_sell_volume += tick.tick_volume;
            }
        }

        self.recalculate_bar_features();
    }

    fn finalize_bar(&mut self) -> Bar {
        self.recalculate_bar_features();
        let mut final_bar = self.building.take().expect("finalize called with a building bar");

        let prev_close = self.bar_history.back().map(|b| b.close).unwrap_or(final_bar.open);
        let change = final_bar.close - prev_close;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.bar_history.len();
        if !self.is_rsi_initialized {
            if n < self.indicator_period {
                self.avg_gain = (self.avg_gain * n as f64 + gain) / (n as f64 + 1.0);
                self.avg_loss = (self.avg_loss * n as f64 + loss) / (n as f64 + 1.0);
            }
            if n == self.indicator_period - 1 {
                self.is_rsi_initialized = true;
            }
        } else {
            let p = self.indicator_period as f64;
            self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
            self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
        }

        let tp = (final_bar.high + final_bar.low + final_bar.close) / 3.0;
        let prev_tp = self.bar_history.back().map(|b| (b.high + b.low + b.close) / 3.0).unwrap_or(tp);
        let sign: i8 = if tp > prev_tp { 1 } else if tp < prev_tp { -1 } else { 0 };
        push_capped(&mut self.money_flow_history, (tp * final_bar.volume as f64, sign), self.indicator_period);

        push_capped(&mut self.delta_history_5m, final_bar.raw_scores.bar_delta, bars_for(5, self.interval_minutes));
        push_capped(&mut self.delta_history_10m, final_bar.raw_scores.bar_delta, bars_for(10, self.interval_minutes));
        push_capped(&mut self.delta_history_30m, final_bar.raw_scores.bar_delta, bars_for(30, self.interval_minutes));
        push_capped(&mut self.clv_history, final_bar.raw_scores.clv, CLV_SMOOTHING_PERIOD);

        let (final_high, final_low, final_close) = (final_bar.high, final_bar.low, final_bar.close);
        let prev = self.bar_history.back();
        let (hh, hl, lh, ll, inside, outside, structure, price_acceptance) = match prev {
            Some(p) => {
                let hh = final_high > p.high + STRUCTURE_EPS;
                let hl = final_low > p.low + STRUCTURE_EPS;
                let lh = final_high < p.high - STRUCTURE_EPS;
                let ll = final_low < p.low - STRUCTURE_EPS;
                let inside = final_high <= p.high + STRUCTURE_EPS && final_low >= p.low - STRUCTURE_EPS;
                let outside = final_high > p.high + STRUCTURE_EPS && final_low < p.low - STRUCTURE_EPS;
                let structure = if hh && hl {
                    Structure::Up
                } else if ll && lh {
                    Structure::Down
                } else if inside {
                    Structure::Inside
                } else if outside {
                    Structure::Outside
                } else {
                    Structure::Mixed
                };
                let price_acceptance: i8 = if final_close > p.high {
                    1
                } else if final_close < p.low {
                    -1
                } else {
                    0
                };
                (hh, hl, lh, ll, inside, outside, structure, price_acceptance)
            }
            None => (false, false, false, false, false, false, Structure::Init, 0),
        };

        let rs = &mut final_bar.raw_scores;
        rs.hh = hh;
        rs.hl = hl;
        rs.lh = lh;
        rs.ll = ll;
        rs.inside = inside;
        rs.outside = outside;
        rs.structure = structure;
        rs.price_acceptance = price_acceptance;
        rs.structure_ratio = match structure {
            Structure::Up => 1.0,
            Structure::Down => -1.0,
            _ => 0.0,
        };

        debug!(
            stock = %self.stock_name,
            interval = self.interval_minutes,
            timestamp = %final_bar.timestamp,
            structure = ?final_bar.raw_scores.structure,
            "bar finalized"
        );

        push_capped(&mut self.bar_history, final_bar.clone(), BAR_HISTORY_CAP);
        final_bar
    }

    fn recalculate_bar_features(&mut self) {
        let Some(bar) = self.building.as_ref() else { return };
        let bar_close = bar.close;
        let bar_high = bar.high;
        let bar_low = bar.low;
        let bar_volume = bar.volume;
        let bar_open = bar.open;
        let bar_delta = bar.raw_scores.bar_delta;
        let large_buy = bar.raw_scores.large_buy_volume;
        let large_sell = bar.raw_scores.large_sell_volume;

        let prev_bar = self.bar_history.back();
        let prev_close = prev_bar.map(|b| b.close).unwrap_or(bar_open);
        let prev_obv = prev_bar.map(|b| b.raw_scores.obv).unwrap_or(0);
        let prev_lvc_delta = prev_bar.map(|b| b.raw_scores.lvc_delta).unwrap_or(0);

        let cvd_5m = self.delta_history_5m.iter().sum::<i64>() + bar_delta;
        let cvd_10m = self.delta_history_10m.iter().sum::<i64>() + bar_delta;
        let cvd_30m = self.delta_history_30m.iter().sum::<i64>() + bar_delta;

        let rsi = self.calculate_rsi(bar_close, prev_close);
        let mfi = self.calculate_mfi(bar_high, bar_low, bar_close, bar_volume, prev_bar);
        let obv = calculate_obv(bar_close, prev_close, bar_volume, prev_obv);
        let lvc_delta = prev_lvc_delta + large_buy - large_sell;

        let bar_range = bar_high - bar_low;
        let clv = if bar_range > 0.0 {
            ((bar_close - bar_low) - (bar_high - bar_close)) / bar_range
        } else {
            0.0
        };
        let clv_sum: f64 = self.clv_history.iter().sum::<f64>() + clv;
        let clv_smoothed = clv_sum / (self.clv_history.len() + 1) as f64;

        {
            let bar = self.building.as_mut().expect("checked above");
            bar.raw_scores.cvd_5m = cvd_5m;
            bar.raw_scores.cvd_10m = cvd_10m;
            bar.raw_scores.cvd_30m = cvd_30m;
            bar.raw_scores.rsi = rsi;
            bar.raw_scores.mfi = mfi;
            bar.raw_scores.obv = obv;
            bar.raw_scores.lvc_delta = lvc_delta;
            bar.raw_scores.clv = clv;
            bar.raw_scores.clv_smoothed = clv_smoothed;
        }

        let divergence = {
            let bar_ref = self.building.as_ref().expect("checked above");
            compute_divergence(bar_ref, &self.bar_history, self.interval_minutes, self.divergence_lookback_minutes)
        };
        self.building.as_mut().expect("checked above").raw_scores.divergence = divergence;
    }

    fn calculate_rsi(&self, current_close: f64, prev_close: f64) -> f64 {
        let change = current_close - prev_close;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.bar_history.len();

        let (cur_avg_gain, cur_avg_loss) = if self.is_rsi_initialized {
            let p = self.indicator_period as f64;
            ((self.avg_gain * (p - 1.0) + gain) / p, (self.avg_loss * (p - 1.0) + loss) / p)
        } else {
            (
                (self.avg_gain * n as f64 + gain) / (n as f64 + 1.0),
                (self.avg_loss * n as f64 + loss) / (n as f64 + 1.0),
            )
        };

        if cur_avg_loss == 0.0 {
            return 100.0;
        }
        let rs = cur_avg_gain / cur_avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    fn calculate_mfi(&self, high: f64, low: f64, close: f64, volume: i64, prev_bar: Option<&Bar>) -> f64 {
        let Some(prev) = prev_bar else { return 50.0 };
        let tp = (high + low + close) / 3.0;
        let prev_tp = (prev.high + prev.low + prev.close) / 3.0;
        let sign: i8 = if tp > prev_tp { 1 } else if tp < prev_tp { -1 } else { 0 };

        let mut temp: Vec<(f64, i8)> = self.money_flow_history.iter().cloned().collect();
        temp.push((tp * volume as f64, sign));
        if temp.len() > self.indicator_period {
            temp.remove(0);
        }

        let pos_flow: f64 = temp.iter().filter(|(_, s)| *s == 1).map(|(f, _)| f).sum();
        let neg_flow: f64 = temp.iter().filter(|(_, s)| *s == -1).map(|(f, _)| f).sum();
        if neg_flow == 0.0 {
            return if pos_flow > 0.0 { 100.0 } else { 50.0 };
        }
        let mf_ratio = pos_flow / neg_flow;
        100.0 - 100.0 / (1.0 + mf_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tick_at(ts: DateTime<Utc>, price: f64) -> EnrichedTick {
        EnrichedTick {
            tick: crate::model::Tick {
                timestamp: ts,
                instrument_token: 123,
                stock_name: "TEST".into(),
                last_price: Some(price),
                last_traded_quantity: None,
                average_traded_price: None,
                volume_traded: None,
                total_buy_quantity: None,
                total_sell_quantity: None,
                depth: None,
            },
            tick_volume: 0,
            trade_sign: 0,
            is_large_trade: false,
            is_buy_absorption: false,
            is_sell_absorption: false,
        }
    }

    fn tick_with_volume(ts: DateTime<Utc>, price: f64, tick_volume: i64, trade_sign: i8) -> EnrichedTick {
        let mut t = tick_at(ts, price);
        t.tick_volume = tick_volume;
        t.trade_sign = trade_sign;
        t
    }

    fn aggregator() -> BarAggregator {
        BarAggregator::new("TEST".into(), 123, 1, 14, 30)
    }

    #[test]
    fn ohlc_progression_across_three_ticks_in_one_bucket() {
        // S1
        let mut agg = aggregator();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        agg.add_tick(&tick_at(base, 100.0));
        agg.add_tick(&tick_at(base + chrono::Duration::seconds(1), 105.0));
        agg.add_tick(&tick_at(base + chrono::Duration::seconds(2), 95.0));

        let bar = agg.building_bar().unwrap();
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.low, 95.0);
        assert_eq!(bar.close, 95.0);
        assert_eq!(bar.volume, 0);
    }

    #[test]
    fn cvd_accumulates_within_one_bar() {
        // S2
        let mut agg = aggregator();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        agg.add_tick(&tick_with_volume(base, 100.0, 100, 1));
        agg.add_tick(&tick_with_volume(base + chrono::Duration::seconds(5), 100.0, 40, -1));

        assert_eq!(agg.building_bar().unwrap().raw_scores.bar_delta, 60);
    }

    #[test]
    fn tick_in_next_minute_finalizes_previous_bucket() {
        // S3
        let mut agg = aggregator();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap();

        agg.add_tick(&tick_at(t1, 100.0));
        let completed = agg.add_tick(&tick_at(t2, 101.0));

        let completed = completed.expect("expected a finalized bar");
        assert_eq!(completed.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn inside_and_outside_are_mutually_exclusive() {
        let mut agg = aggregator();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 0).unwrap();

        agg.add_tick(&tick_at(t0, 100.0));
        let first = agg.add_tick(&tick_at(t1, 100.0)).unwrap();
        assert_eq!(first.raw_scores.structure, Structure::Init);

        agg.add_tick(&tick_at(t1, 100.0));
        let second = agg.add_tick(&tick_at(t2, 100.0)).unwrap();
        assert!(!(second.raw_scores.inside && second.raw_scores.outside));
    }

    #[test]
    fn bucket_snaps_to_multiple_of_interval_within_the_hour() {
        let mut agg = BarAggregator::new("TEST".into(), 123, 15, 14, 30);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 10, 47, 12).unwrap();
        agg.add_tick(&tick_at(t, 100.0));
        assert_eq!(agg.building_bar().unwrap().timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 10, 45, 0).unwrap());
    }
}
