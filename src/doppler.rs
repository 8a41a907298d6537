/*! Doppler frequency extrapolation.

A Lagrange extrapolator over the most recent frequency measurements. This
is the one component in the crate that is read from a thread other than its
writer: a tracking thread submits `(sample index, frequency)` measurements
while the correction thread asks for predictions, so the sample window sits
behind a mutex.
*/

use std::collections::VecDeque;
use std::sync::Mutex;

struct Window {
    data: VecDeque<(u64, f64)>,
    ready: bool,
}

/// Lagrange extrapolation engine over the last `degree` measurements.
pub struct DopplerFit {
    degree: usize,
    window: Mutex<Window>,
}

impl DopplerFit {
    /// Create an engine using a polynomial through `degree` points.
    pub fn new(degree: usize) -> Self {
        assert!(degree > 0);
        Self {
            degree,
            window: Mutex::new(Window {
                data: VecDeque::with_capacity(degree),
                ready: false,
            }),
        }
    }

    /// Submit a new measurement: frequency `y` observed at sample index
    /// `x`. Until `degree` measurements have arrived, predictions are 0.
    pub fn fit(&self, x: u64, y: f64) {
        let mut w = self.window.lock().expect("doppler window poisoned");
        if w.ready {
            w.data.pop_front();
        }
        w.data.push_back((x, y));
        if w.data.len() == self.degree {
            w.ready = true;
        }
    }

    fn lagrange(data: &VecDeque<(u64, f64)>, x: f64) -> f64 {
        let mut ret = 0.0;
        for (i, (xi, yi)) in data.iter().enumerate() {
            let mut m = *yi;
            for (j, (xj, _)) in data.iter().enumerate() {
                if i != j && xi != xj {
                    m *= (x - *xj as f64) / (*xi as f64 - *xj as f64);
                }
            }
            ret += m;
        }
        ret
    }

    /// Fill `freqs` with predicted frequencies, one every
    /// `samples_per_correction` samples starting at the newest
    /// measurement.
    pub fn predict_freqs(&self, freqs: &mut [f64], samples_per_correction: usize) {
        let w = self.window.lock().expect("doppler window poisoned");
        if !w.ready {
            freqs.fill(0.0);
            return;
        }
        let newest = w.data.back().expect("window is ready").0;
        for (i, f) in freqs.iter_mut().enumerate() {
            let x = newest as f64 + (i * samples_per_correction) as f64;
            *f = Self::lagrange(&w.data, x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_predicts_zero() {
        let fit = DopplerFit::new(4);
        fit.fit(0, 1000.0);
        let mut out = [1.0; 3];
        fit.predict_freqs(&mut out, 100);
        assert_eq!(out, [0.0; 3]);
    }

    #[test]
    fn extrapolates_linear_ramp() {
        let fit = DopplerFit::new(2);
        fit.fit(0, 0.0);
        fit.fit(1000, 10.0);
        let mut out = [0.0; 3];
        fit.predict_freqs(&mut out, 500);
        assert!((out[0] - 10.0).abs() < 1e-9);
        assert!((out[1] - 15.0).abs() < 1e-9);
        assert!((out[2] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn window_slides() {
        let fit = DopplerFit::new(2);
        fit.fit(0, 0.0);
        fit.fit(100, 100.0);
        // Newer samples flatten the ramp; the old one must be gone.
        fit.fit(200, 100.0);
        let mut out = [0.0; 1];
        fit.predict_freqs(&mut out, 100);
        assert!((out[0] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn shared_across_threads() {
        let fit = std::sync::Arc::new(DopplerFit::new(2));
        let writer = fit.clone();
        let t = std::thread::spawn(move || {
            for i in 0..100u64 {
                writer.fit(i * 10, i as f64);
            }
        });
        let mut out = [0.0; 4];
        for _ in 0..50 {
            fit.predict_freqs(&mut out, 10);
        }
        t.join().unwrap();
        fit.predict_freqs(&mut out, 10);
        assert!((out[0] - 99.0).abs() < 1e-9);
    }
}
