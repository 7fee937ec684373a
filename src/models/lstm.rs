//! Single-layer LSTM forecaster trained with truncated backpropagation
//! through time.
//!
//! The series is standardised and cut into windows of `look_back` values;
//! the network reads each window one value at a time and a linear head maps
//! the final hidden state to the next value. Multi-step forecasts feed each
//! prediction back as input.
//!
//! ```text
//! f_t = σ(W_f x_t + U_f h_{t-1} + b_f)
//! i_t = σ(W_i x_t + U_i h_{t-1} + b_i)
//! g_t = tanh(W_g x_t + U_g h_{t-1} + b_g)
//! o_t = σ(W_o x_t + U_o h_{t-1} + b_o)
//! c_t = f_t ⊙ c_{t-1} + i_t ⊙ g_t
//! h_t = o_t ⊙ tanh(c_t)
//! ```

use crate::core::{DailySeries, Forecast};
use crate::error::{ForecastError, Result};
use crate::models::Forecaster;
use crate::utils::deadline::Deadline;
use crate::utils::stats::z_for_level;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const NAME: &str = "LSTM";
const BATCH_SIZE: usize = 32;
const GRAD_CLIP: f64 = 5.0;

/// Gate order inside the stacked parameter blocks.
const FORGET: usize = 0;
const INPUT: usize = 1;
const CELL: usize = 2;
const OUTPUT: usize = 3;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Flat parameter vector with fixed offsets, so one Adam state covers
/// everything.
#[derive(Debug, Clone)]
struct Layout {
    hidden: usize,
}

impl Layout {
    fn w(&self) -> usize {
        0
    }
    fn u(&self) -> usize {
        4 * self.hidden
    }
    fn b(&self) -> usize {
        self.u() + 4 * self.hidden * self.hidden
    }
    fn v(&self) -> usize {
        self.b() + 4 * self.hidden
    }
    fn c(&self) -> usize {
        self.v() + self.hidden
    }
    fn len(&self) -> usize {
        self.c() + 1
    }
}

/// Per-step activations kept for the backward pass.
struct Step {
    x: f64,
    h_prev: Vec<f64>,
    c_prev: Vec<f64>,
    gates: [Vec<f64>; 4],
    c: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
    lr: f64,
}

impl Adam {
    fn new(n: usize, lr: f64) -> Self {
        Self {
            m: vec![0.0; n],
            v: vec![0.0; n],
            t: 0,
            lr,
        }
    }

    fn step(&mut self, params: &mut [f64], grad: &[f64]) {
        const B1: f64 = 0.9;
        const B2: f64 = 0.999;
        const EPS: f64 = 1e-8;
        self.t += 1;
        let c1 = 1.0 - B1.powi(self.t);
        let c2 = 1.0 - B2.powi(self.t);
        for k in 0..params.len() {
            self.m[k] = B1 * self.m[k] + (1.0 - B1) * grad[k];
            self.v[k] = B2 * self.v[k] + (1.0 - B2) * grad[k] * grad[k];
            params[k] -= self.lr * (self.m[k] / c1) / ((self.v[k] / c2).sqrt() + EPS);
        }
    }
}

/// LSTM sequence model over a single daily variable.
#[derive(Debug, Clone)]
pub struct Lstm {
    seasonal_periods: Vec<usize>,
    look_back: usize,
    hidden: usize,
    epochs: usize,
    learning_rate: f64,
    seed: u64,
    deadline: Deadline,

    layout: Layout,
    params: Vec<f64>,
    mean: f64,
    scale: f64,
    history: Vec<f64>,
    sigma: f64,
    loss_history: Vec<f64>,
    fitted: Option<Vec<f64>>,
    residuals: Option<Vec<f64>>,
}

impl Lstm {
    pub fn new(seasonal_periods: Vec<usize>) -> Self {
        let hidden = 8;
        Self {
            seasonal_periods: seasonal_periods.into_iter().filter(|&p| p > 1).collect(),
            look_back: 7,
            hidden,
            epochs: 50,
            learning_rate: 0.01,
            seed: 42,
            deadline: Deadline::none(),
            layout: Layout { hidden },
            params: Vec::new(),
            mean: 0.0,
            scale: 1.0,
            history: Vec::new(),
            sigma: 0.0,
            loss_history: Vec::new(),
            fitted: None,
            residuals: None,
        }
    }

    pub fn with_look_back(mut self, look_back: usize) -> Self {
        self.look_back = look_back.max(1);
        self
    }

    pub fn with_hidden(mut self, hidden: usize) -> Self {
        self.hidden = hidden.max(1);
        self.layout = Layout {
            hidden: self.hidden,
        };
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Mean squared training error per epoch, on the standardised scale.
    pub fn loss_history(&self) -> &[f64] {
        &self.loss_history
    }

    /// Minimum length: three full cycles of the longest period, and enough
    /// for at least two training windows.
    pub fn min_points(&self) -> usize {
        let cycles = 3 * self.seasonal_periods.iter().max().copied().unwrap_or(1);
        cycles.max(self.look_back + 2)
    }

    fn init_params(&self, rng: &mut StdRng) -> Vec<f64> {
        let l = &self.layout;
        let bound = 1.0 / (self.hidden as f64).sqrt();
        let mut params: Vec<f64> = (0..l.len())
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        for j in 0..self.hidden {
            params[l.b() + FORGET * self.hidden + j] = 1.0;
        }
        params
    }

    fn forward(&self, params: &[f64], window: &[f64]) -> (f64, Vec<Step>) {
        let l = &self.layout;
        let hs = self.hidden;
        let mut h = vec![0.0; hs];
        let mut c = vec![0.0; hs];
        let mut steps = Vec::with_capacity(window.len());

        for &x in window {
            let mut gates: [Vec<f64>; 4] = std::array::from_fn(|_| vec![0.0; hs]);
            for (g, gate) in gates.iter_mut().enumerate() {
                for j in 0..hs {
                    let row = g * hs + j;
                    let mut z = params[l.w() + row] * x + params[l.b() + row];
                    let u = &params[l.u() + row * hs..l.u() + (row + 1) * hs];
                    z += u.iter().zip(&h).map(|(a, b)| a * b).sum::<f64>();
                    gate[j] = if g == CELL { z.tanh() } else { sigmoid(z) };
                }
            }
            let c_new: Vec<f64> = (0..hs)
                .map(|j| gates[FORGET][j] * c[j] + gates[INPUT][j] * gates[CELL][j])
                .collect();
            let h_new: Vec<f64> = (0..hs)
                .map(|j| gates[OUTPUT][j] * c_new[j].tanh())
                .collect();
            steps.push(Step {
                x,
                h_prev: std::mem::replace(&mut h, h_new),
                c_prev: std::mem::replace(&mut c, c_new.clone()),
                gates,
                c: c_new,
            });
        }

        let out = params[l.c()]
            + params[l.v()..l.v() + hs]
                .iter()
                .zip(&h)
                .map(|(a, b)| a * b)
                .sum::<f64>();
        (out, steps)
    }

    /// Accumulate the gradient of `(ŷ - y)²` into `grad`; returns the loss.
    fn backward(&self, params: &[f64], window: &[f64], target: f64, grad: &mut [f64]) -> f64 {
        let l = &self.layout;
        let hs = self.hidden;
        let (out, steps) = self.forward(params, window);
        let err = out - target;
        let d_out = 2.0 * err;

        let last = match steps.last() {
            Some(s) => s,
            None => return err * err,
        };
        let h_last: Vec<f64> = (0..hs)
            .map(|j| last.gates[OUTPUT][j] * last.c[j].tanh())
            .collect();
        for j in 0..hs {
            grad[l.v() + j] += d_out * h_last[j];
        }
        grad[l.c()] += d_out;

        let mut dh: Vec<f64> = (0..hs).map(|j| d_out * params[l.v() + j]).collect();
        let mut dc = vec![0.0; hs];
        let mut dz = vec![0.0; 4 * hs];

        for step in steps.iter().rev() {
            let [f, i, g, o] = &step.gates;
            for j in 0..hs {
                let tc = step.c[j].tanh();
                let d_o = dh[j] * tc;
                dc[j] += dh[j] * o[j] * (1.0 - tc * tc);
                let d_i = dc[j] * g[j];
                let d_g = dc[j] * i[j];
                let d_f = dc[j] * step.c_prev[j];
                dz[FORGET * hs + j] = d_f * f[j] * (1.0 - f[j]);
                dz[INPUT * hs + j] = d_i * i[j] * (1.0 - i[j]);
                dz[CELL * hs + j] = d_g * (1.0 - g[j] * g[j]);
                dz[OUTPUT * hs + j] = d_o * o[j] * (1.0 - o[j]);
                dc[j] *= f[j];
            }

            let mut dh_prev = vec![0.0; hs];
            for (row, &d) in dz.iter().enumerate() {
                grad[l.w() + row] += d * step.x;
                grad[l.b() + row] += d;
                let u_start = l.u() + row * hs;
                for k in 0..hs {
                    grad[u_start + k] += d * step.h_prev[k];
                    dh_prev[k] += d * params[u_start + k];
                }
            }
            dh = dh_prev;
        }

        err * err
    }

    fn predict_scaled(&self, window: &[f64]) -> f64 {
        self.forward(&self.params, window).0
    }
}

impl Forecaster for Lstm {
    fn fit(&mut self, series: &DailySeries) -> Result<()> {
        let values = series.values();
        let n = values.len();
        let needed = self.min_points();
        if n < needed {
            return Err(ForecastError::InsufficientData { needed, got: n });
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ForecastError::InvalidConfig(
                "learning_rate must be positive".to_string(),
            ));
        }

        self.mean = values.iter().sum::<f64>() / n as f64;
        let sd = (values.iter().map(|v| (v - self.mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        self.scale = if sd > 1e-12 { sd } else { 1.0 };
        let scaled: Vec<f64> = values.iter().map(|v| (v - self.mean) / self.scale).collect();

        let lb = self.look_back;
        let samples: Vec<usize> = (lb..n).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut params = self.init_params(&mut rng);
        let mut adam = Adam::new(params.len(), self.learning_rate);
        let mut order = samples.clone();
        self.loss_history.clear();

        for epoch in 0..self.epochs {
            if let Err(e) = self.deadline.check(NAME) {
                tracing::debug!(epoch, "LSTM training interrupted");
                return Err(e);
            }
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for batch in order.chunks(BATCH_SIZE) {
                let mut grad = vec![0.0; params.len()];
                for &t in batch {
                    epoch_loss += self.backward(&params, &scaled[t - lb..t], scaled[t], &mut grad);
                }
                let scale = 1.0 / batch.len() as f64;
                grad.iter_mut().for_each(|g| *g *= scale);
                let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
                if norm > GRAD_CLIP {
                    grad.iter_mut().for_each(|g| *g *= GRAD_CLIP / norm);
                }
                adam.step(&mut params, &grad);
            }
            let mean_loss = epoch_loss / samples.len() as f64;
            if !mean_loss.is_finite() {
                return Err(ForecastError::fit(NAME, "training diverged"));
            }
            self.loss_history.push(mean_loss);
        }
        self.params = params;

        let mut fitted = values[..lb].to_vec();
        fitted.extend(
            samples
                .iter()
                .map(|&t| self.predict_scaled(&scaled[t - lb..t]) * self.scale + self.mean),
        );
        let residuals: Vec<f64> = values.iter().zip(&fitted).map(|(y, f)| y - f).collect();
        let trained = &residuals[lb..];
        self.sigma = (trained.iter().map(|r| r * r).sum::<f64>() / trained.len() as f64).sqrt();
        self.history = scaled;
        self.fitted = Some(fitted);
        self.residuals = Some(residuals);
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Forecast> {
        if self.fitted.is_none() {
            return Err(ForecastError::FitRequired);
        }
        let lb = self.look_back;
        let mut window = self.history[self.history.len() - lb..].to_vec();
        let mut out = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let next = self.predict_scaled(&window);
            out.push(next * self.scale + self.mean);
            window.remove(0);
            window.push(next);
        }
        Ok(Forecast::from_values(out))
    }

    fn predict_with_intervals(&self, horizon: usize, level: f64) -> Result<Forecast> {
        let point = self.predict(horizon)?;
        let sds: Vec<f64> = (1..=horizon)
            .map(|h| self.sigma * (h as f64).sqrt())
            .collect();
        Ok(Forecast::with_symmetric_intervals(
            point.point().to_vec(),
            &sds,
            z_for_level(level),
        ))
    }

    fn fitted_values(&self) -> Option<&[f64]> {
        self.fitted.as_deref()
    }

    fn residuals(&self) -> Option<&[f64]> {
        self.residuals.as_deref()
    }

    fn name(&self) -> &str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn weekly(n: usize) -> DailySeries {
        let values = (0..n)
            .map(|i| 20.0 + 4.0 * (2.0 * std::f64::consts::PI * i as f64 / 7.0).sin())
            .collect();
        DailySeries::observed("temperature", NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(), values)
            .unwrap()
    }

    #[test]
    fn requires_three_cycles() {
        let mut model = Lstm::new(vec![30]);
        let err = model.fit(&weekly(60)).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 90, got: 60 });
    }

    #[test]
    fn training_reduces_loss() {
        let mut model = Lstm::new(vec![7]).with_epochs(40);
        model.fit(&weekly(140)).unwrap();
        let losses = model.loss_history();
        assert_eq!(losses.len(), 40);
        assert!(losses[39] < losses[0]);

        let forecast = model.predict_with_intervals(10, 0.95).unwrap();
        assert_eq!(forecast.horizon(), 10);
        assert!(forecast.point().iter().all(|v| v.is_finite()));
        for h in 0..10 {
            assert!(forecast.lower().unwrap()[h] <= forecast.upper().unwrap()[h]);
        }
    }

    #[test]
    fn same_seed_same_forecast() {
        let series = weekly(84);
        let mut a = Lstm::new(vec![7]).with_epochs(5).with_seed(3);
        let mut b = Lstm::new(vec![7]).with_epochs(5).with_seed(3);
        a.fit(&series).unwrap();
        b.fit(&series).unwrap();
        assert_eq!(a.predict(7).unwrap().point(), b.predict(7).unwrap().point());
    }

    #[test]
    fn expired_deadline_times_out() {
        let deadline = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        let mut model = Lstm::new(vec![7]).with_deadline(deadline);
        assert!(model.fit(&weekly(84)).unwrap_err().is_timeout());
    }

    #[test]
    fn predict_before_fit() {
        let model = Lstm::new(vec![7]);
        assert_eq!(model.predict(3).unwrap_err(), ForecastError::FitRequired);
    }
}
