/*! CW (Morse) decoder.

Consumes the on/off trigger stream of an energy detector, one bit per
input item, and turns plateaus into dots and dashes. Plateau detection
runs a moving sum over half a dot period and gates on its coefficient of
variation: a carrier that is really on holds the sum high *and* steady.
Dot, dash and pause decisions use a confidence factor so slightly mangled
keying still decodes.

A frame is the decoded text, committed after a silence of three word
pauses.
*/

use log::{debug, trace};

use crate::decoder::{Decoder, DecoderStatus, next_unique_id};
use crate::moving_sum::MovingSum;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MorseSymbol {
    Dot,
    Dash,
    ShortSpace,
    LongSpace,
    EndOfMessage,
}

fn morse_lookup(seq: &str) -> Option<char> {
    Some(match seq {
        ".-" => 'A',
        "-..." => 'B',
        "-.-." => 'C',
        "-.." => 'D',
        "." => 'E',
        "..-." => 'F',
        "--." => 'G',
        "...." => 'H',
        ".." => 'I',
        ".---" => 'J',
        "-.-" => 'K',
        ".-.." => 'L',
        "--" => 'M',
        "-." => 'N',
        "---" => 'O',
        ".--." => 'P',
        "--.-" => 'Q',
        ".-." => 'R',
        "..." => 'S',
        "-" => 'T',
        "..-" => 'U',
        "...-" => 'V',
        ".--" => 'W',
        "-..-" => 'X',
        "-.--" => 'Y',
        "--.." => 'Z',
        "-----" => '0',
        ".----" => '1',
        "..---" => '2',
        "...--" => '3',
        "....-" => '4',
        "....." => '5',
        "-...." => '6',
        "--..." => '7',
        "---.." => '8',
        "----." => '9',
        ".-.-.-" => '.',
        "--..--" => ',',
        "..--.." => '?',
        "-....-" => '-',
        "-..-." => '/',
        "-...-" => '=',
        _ => return None,
    })
}

/// Dot/dash accumulator for one character plus the word being built.
struct MorseTree {
    seq: String,
    word: String,
    max_word_len: usize,
    unrecognized: char,
}

impl MorseTree {
    fn new(unrecognized: char, max_word_len: usize) -> Self {
        Self {
            seq: String::new(),
            word: String::new(),
            max_word_len,
            unrecognized,
        }
    }

    /// Append a dot or dash. False once the sequence cannot be a valid
    /// character anymore; further symbols are ignored until a space.
    fn push(&mut self, c: char) -> bool {
        if self.seq.len() >= 6 {
            return false;
        }
        self.seq.push(c);
        true
    }

    /// Commit the pending character to the word. False when the word hit
    /// its cap.
    fn commit_char(&mut self) -> bool {
        if !self.seq.is_empty() {
            let ch = morse_lookup(&self.seq).unwrap_or(self.unrecognized);
            self.word.push(ch);
            self.seq.clear();
        }
        self.word.len() < self.max_word_len
    }

    fn word_len(&self) -> usize {
        self.word.len()
    }

    fn take_word(&mut self) -> String {
        self.seq.clear();
        std::mem::take(&mut self.word)
    }

    fn reset(&mut self) {
        self.seq.clear();
        self.word.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoSync,
    SearchDot,
    SearchDash,
    SearchSpace,
}

/// CW decoder over a trigger bit stream.
pub struct CwDecoder {
    confidence: f32,
    dot_duration: usize,
    dash_duration: usize,
    short_pause_duration: usize,
    long_pause_duration: usize,
    min_frame_len: usize,
    max_frame_len: usize,
    trigger_level: f32,
    freq_offset: Option<f64>,
    snr: Option<f32>,
    width: usize,
    tree: MorseTree,
    text: String,
    state: State,
    movs: MovingSum<f32>,
    std_movs: MovingSum<f32>,
    std_sq_movs: MovingSum<f32>,
    id: usize,
}

impl CwDecoder {
    /// Create a decoder. `dot_duration` is the nominal dot length in
    /// input items, `confidence` in `(0, 1]` relaxes every timing
    /// decision.
    pub fn new(
        dot_duration: usize,
        confidence: f32,
        min_frame_len: usize,
        max_frame_len: usize,
    ) -> Result<Self> {
        if min_frame_len >= max_frame_len {
            return Err(Error::config("wrong minimum or maximum frame length"));
        }
        if min_frame_len > 512 {
            return Err(Error::config("invalid minimum frame length"));
        }
        if dot_duration < 4 {
            return Err(Error::config("dot duration unusably short"));
        }
        if !(0.0..=1.0).contains(&confidence) || confidence == 0.0 {
            return Err(Error::config("invalid confidence level"));
        }
        Ok(Self {
            confidence,
            // A quarter of slack on every nominal duration keeps early
            // triggering from eating symbols.
            dot_duration: dot_duration - dot_duration / 4,
            dash_duration: 3 * dot_duration - dot_duration / 4,
            short_pause_duration: 3 * dot_duration - dot_duration / 4,
            long_pause_duration: 7 * dot_duration - dot_duration / 4,
            min_frame_len,
            max_frame_len,
            trigger_level: dot_duration as f32 * confidence,
            freq_offset: None,
            snr: None,
            width: 0,
            tree: MorseTree::new('?', max_frame_len),
            text: String::new(),
            state: State::NoSync,
            // Non-zero initial sums keep the coefficient of variation
            // finite during warm-up.
            movs: MovingSum::new((dot_duration / 2).max(1), 1.0),
            std_movs: MovingSum::new(5, 1.0),
            std_sq_movs: MovingSum::new(5, 1.0),
            id: next_unique_id(),
        })
    }

    /// Channel frequency offset stamped into emitted frames.
    pub fn set_freq_offset(&mut self, freq: f64) {
        self.freq_offset = Some(freq);
    }

    /// SNR estimate stamped into emitted frames.
    pub fn set_snr(&mut self, snr: f32) {
        self.snr = Some(snr);
    }

    fn check_conf_level(&self, cnt: usize, target: usize) -> bool {
        cnt as f32 > target as f32 * self.confidence
    }

    fn received_symbol(&mut self, s: MorseSymbol) -> Option<String> {
        let mut ok = true;
        match s {
            MorseSymbol::Dot => ok = self.tree.push('.'),
            MorseSymbol::Dash => ok = self.tree.push('-'),
            MorseSymbol::ShortSpace => ok = self.tree.commit_char(),
            MorseSymbol::LongSpace => {
                self.tree.commit_char();
                if self.tree.word_len() > 0 {
                    self.text.push_str(&self.tree.take_word());
                    self.text.push(' ');
                    self.tree.reset();
                }
            }
            MorseSymbol::EndOfMessage => {
                if self.text.len() > self.min_frame_len {
                    self.tree.reset();
                    return Some(std::mem::take(&mut self.text));
                }
            }
        }
        // A hopeless character sequence or a full word flushes what we
        // have so far.
        if !ok && self.tree.word_len() >= self.max_frame_len {
            let mut s = std::mem::take(&mut self.text);
            s.push_str(&self.tree.take_word());
            self.tree.reset();
            return Some(s);
        }
        None
    }

    fn emit(&mut self, status: &mut DecoderStatus, message: String) {
        debug!("CW message: {message}");
        let m = &mut status.metadata;
        m.set_decoder("cw", "1.0");
        m.set_pdu(message.as_bytes());
        m.set_time_now();
        if let Some(freq) = self.freq_offset {
            m.set_freq_offset(freq);
        }
        if let Some(snr) = self.snr {
            m.set_snr(snr);
        }
        status.decode_success = true;
    }

    /// Process one trigger value; returns a completed message, if any.
    fn step(&mut self, newval: f32) -> Option<String> {
        // The +1 offset keeps the mean away from zero so the coefficient
        // of variation stays defined.
        let mv = self.movs.insert(newval + 1.0);
        let mu = self.std_movs.insert(mv) / 5.0;
        let x = self.std_sq_movs.insert(mv * mv);
        let std_val = (x / 5.0 - mu * mu).max(0.0).sqrt();
        let triggered = mv > self.trigger_level && (std_val / mu) < (1.0 - self.confidence);

        match self.state {
            State::NoSync => {
                if triggered {
                    self.enter_search_dot();
                } else {
                    self.width += 1;
                    if self.width > 3 * self.long_pause_duration {
                        let msg = self.received_symbol(MorseSymbol::EndOfMessage);
                        self.enter_no_sync();
                        return msg;
                    }
                }
            }
            State::SearchDot => {
                if triggered {
                    self.width += 1;
                    if self.width > self.dot_duration {
                        self.state = State::SearchDash;
                    }
                } else {
                    let mut msg = None;
                    if self.check_conf_level(self.width, self.dot_duration) {
                        msg = self.received_symbol(MorseSymbol::Dot);
                    }
                    self.enter_search_space();
                    return msg;
                }
            }
            State::SearchDash => {
                if triggered {
                    self.width += 1;
                } else {
                    // A plateau way beyond a dash is a carrier or a
                    // spur, not keying.
                    let msg = if self.width as f32 > self.dash_duration as f32 * 1.75 {
                        self.enter_no_sync();
                        return None;
                    } else if self.check_conf_level(self.width, self.dash_duration) {
                        self.received_symbol(MorseSymbol::Dash)
                    } else {
                        self.received_symbol(MorseSymbol::Dot)
                    };
                    self.enter_search_space();
                    return msg;
                }
            }
            State::SearchSpace => {
                if triggered {
                    let msg = if self.check_conf_level(self.width, self.long_pause_duration) {
                        self.received_symbol(MorseSymbol::LongSpace)
                    } else if self.check_conf_level(self.width, self.short_pause_duration) {
                        self.received_symbol(MorseSymbol::ShortSpace)
                    } else {
                        None
                    };
                    self.enter_search_dot();
                    return msg;
                } else {
                    self.width += 1;
                    if self.check_conf_level(self.width, self.long_pause_duration) {
                        let msg = self.received_symbol(MorseSymbol::LongSpace);
                        self.enter_no_sync();
                        return msg;
                    }
                }
            }
        }
        None
    }

    fn enter_no_sync(&mut self) {
        self.width = 0;
        self.state = State::NoSync;
    }

    fn enter_search_dot(&mut self) {
        self.width = 0;
        self.state = State::SearchDot;
    }

    fn enter_search_space(&mut self) {
        self.width = 0;
        self.state = State::SearchSpace;
    }
}

impl Decoder for CwDecoder {
    fn decode(&mut self, input: &[u8]) -> DecoderStatus {
        let mut status = DecoderStatus::new();
        for (i, item) in input.iter().enumerate() {
            if let Some(message) = self.step((item & 0x1) as f32) {
                trace!("message complete after {} items", i + 1);
                self.emit(&mut status, message);
                status.consumed = i + 1;
                return status;
            }
        }
        status.consumed = input.len();
        status
    }

    fn reset(&mut self) {
        self.tree.reset();
        self.text.clear();
        self.width = 0;
        self.state = State::NoSync;
    }

    fn name(&self) -> &'static str {
        "cw"
    }

    fn version(&self) -> &'static str {
        "1.0"
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn unique_id(&self) -> usize {
        self.id
    }
}
