//! milcodec loopback simulator
//!
//! Usage: milcodec-sim [OPTIONS]
//!
//! Options:
//!   -m, --message <TEXT>     Command to send
//!   -P, --priority <LEVEL>   ROUTINE, PRIORITY, IMMEDIATE or FLASH
//!   -s, --snr <DB>           Masking target in dB
//!   -c, --profile <FILE>     Link profile (JSON)
//!   -k, --passphrase <TEXT>  Derive the session key from a passphrase
//!   -w, --wipe               Exercise Protocol Zero after the first message
//!   -e, --envelope           Seal the message in a passphrase envelope
//!       --dump-profile       Print the reference profile and exit
//!   -h, --help               Print help information

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context};

use milcodec::crypto::{
    seal_with_passphrase, AeadKey, CryptoEngine, Envelope, SecureRandom, MIN_PBKDF2_ITERATIONS,
};
use milcodec::link::KeySchedule;
use milcodec::masking::{
    estimate_snr, mask, synthesize_bed, MaskingConfig, NoiseFloor, DEFAULT_BED_RMS,
};
use milcodec::{LinkProfile, Priority, ProtocolZero, Receiver, Transmitter};

struct Options {
    message: String,
    priority: Priority,
    snr_db: Option<f64>,
    profile: Option<String>,
    passphrase: Option<String>,
    wipe: bool,
    envelope: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            message: "ALL UNITS HOLD POSITION".to_string(),
            priority: Priority::Flash,
            snr_db: None,
            profile: None,
            passphrase: None,
            wipe: false,
            envelope: false,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "--dump-profile" => {
                println!("{}", LinkProfile::reference().to_json()?);
                return Ok(());
            }
            "-m" | "--message" => options.message = value(&mut iter, arg)?.to_string(),
            "-P" | "--priority" => options.priority = value(&mut iter, arg)?.parse()?,
            "-s" | "--snr" => {
                let raw = value(&mut iter, arg)?;
                let snr = raw.parse().with_context(|| format!("invalid SNR: {}", raw))?;
                options.snr_db = Some(snr);
            }
            "-c" | "--profile" => options.profile = Some(value(&mut iter, arg)?.to_string()),
            "-k" | "--passphrase" => options.passphrase = Some(value(&mut iter, arg)?.to_string()),
            "-w" | "--wipe" => options.wipe = true,
            "-e" | "--envelope" => options.envelope = true,
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                return Ok(());
            }
        }
    }

    run(options)
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> anyhow::Result<&'a str> {
    match iter.next() {
        Some(v) => Ok(v.as_str()),
        None => bail!("{} requires a value", flag),
    }
}

fn print_usage() {
    println!(
        r#"milcodec-sim - DSSS covert command link, loopback simulation

USAGE:
    milcodec-sim [OPTIONS]

OPTIONS:
    -m, --message <TEXT>     Command to send (default: ALL UNITS HOLD POSITION)
    -P, --priority <LEVEL>   ROUTINE, PRIORITY, IMMEDIATE or FLASH (default: FLASH)
    -s, --snr <DB>           Masking target, clamped to -30..-10 dB
    -c, --profile <FILE>     Link profile (JSON, see --dump-profile)
    -k, --passphrase <TEXT>  Derive the session key from a passphrase
    -w, --wipe               Run Protocol Zero after the first message
    -e, --envelope           Also seal the message in an armored envelope
        --dump-profile       Print the reference profile and exit
    -h, --help               Print help information

EXAMPLES:
    Send a FLASH order 25 dB under the noise:
        milcodec-sim --snr -25 --message "RTB NOW"

    Passphrase session with a key wipe:
        milcodec-sim --passphrase "blue canary" --wipe
"#
    );
}

fn load_profile(path: &str) -> anyhow::Result<LinkProfile> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading profile {}", path))?;
    Ok(LinkProfile::from_json(&json)?)
}

fn engines(
    profile: &mut LinkProfile,
    passphrase: Option<&str>,
) -> anyhow::Result<(CryptoEngine, CryptoEngine)> {
    match passphrase {
        Some(pass) => {
            let schedule = profile.key_schedule.get_or_insert_with(KeySchedule::generate).clone();
            let tx = schedule.engine(pass.as_bytes())?;
            let rx = schedule.engine(pass.as_bytes())?;
            Ok((tx, rx))
        }
        None => {
            let key = AeadKey::from_bytes(SecureRandom::bytes());
            Ok((CryptoEngine::new(key.clone()), CryptoEngine::new(key)))
        }
    }
}

fn run(options: Options) -> anyhow::Result<()> {
    let mut profile = match &options.profile {
        Some(path) => load_profile(path)?,
        None => LinkProfile::reference(),
    };
    if let Some(snr) = options.snr_db {
        profile.masking = MaskingConfig::new(snr);
    }

    let (tx_engine, rx_engine) = engines(&mut profile, options.passphrase.as_deref())?;
    let rx_engine = Arc::new(rx_engine);
    if let Ok(fp) = rx_engine.vault().fingerprint() {
        tracing::info!("Session key fingerprint: {}", hex::encode(fp));
    }

    let transmitter = Transmitter::new(profile.clone(), Arc::new(tx_engine))?;
    let receiver = Receiver::new(profile.clone(), Arc::clone(&rx_engine))?;

    tracing::info!(
        "Carrier {:.0} Hz, {} chips/bit, {:.1} bit/s, masking {:.1} dB",
        profile.carrier.carrier_freq_hz,
        profile.code.code_len(),
        profile.bit_rate(),
        profile.masking.effective_snr_db()
    );

    let transmission =
        transmitter.transmit_over_noise(options.priority, options.message.as_bytes())?;
    tracing::info!(
        "Sent seq {} ({} samples, {:.2} s of audio)",
        transmission.header.sequence_id,
        transmission.samples.len(),
        transmission.samples.len() as f64 / profile.carrier.sample_rate as f64
    );

    report_signal(&transmitter, &transmission.samples)?;
    measure_link(&transmitter, &receiver, options.message.len())?;

    match receiver.receive(&transmission.samples) {
        Ok(message) => {
            tracing::info!(
                "Received [{}] seq {}: {}",
                message.priority,
                message.sequence_id,
                String::from_utf8_lossy(&message.payload)
            );
            tracing::info!(
                "Lock at sample {} (metric {:.3}), mean confidence {:.3}",
                message.quality.lock_offset,
                message.quality.acquisition_metric,
                message.quality.mean_confidence
            );
        }
        Err(e) => tracing::error!("Receive failed: {}", e),
    }

    if options.envelope {
        let pass = options.passphrase.as_deref().unwrap_or("milcodec");
        let envelope = seal_with_passphrase(
            options.message.as_bytes(),
            pass.as_bytes(),
            MIN_PBKDF2_ITERATIONS,
        )?;
        let armored = envelope.to_armored();
        println!("{}", armored);
        let restored = Envelope::from_armored(&armored)?;
        tracing::info!("Envelope: {} bytes sealed", restored.encode().len());
    }

    if options.wipe {
        protocol_zero(&transmitter, &receiver)?;
    }

    println!("{}", receiver.stats().format_report());
    Ok(())
}

fn report_signal(transmitter: &Transmitter, samples: &[f32]) -> anyhow::Result<()> {
    let floor = NoiseFloor::measure(samples)?;
    tracing::info!(
        "Composite: {:.1} dBFS RMS, {:.1} dBFS peak, crest {:.1} dB",
        floor.rms_dbfs,
        floor.peak_dbfs,
        floor.crest_factor_db
    );

    #[cfg(feature = "spectrum")]
    {
        let carrier = &transmitter.profile().carrier;
        let band = carrier.chip_rate();
        match milcodec::masking::detect_carrier(
            samples,
            carrier.sample_rate,
            carrier.carrier_freq_hz - band,
            carrier.carrier_freq_hz + band,
        ) {
            Ok(peak) => tracing::info!(
                "Strongest tone near the carrier: {:.0} Hz, {:.1} dB above the band median",
                peak.freq_hz,
                peak.prominence_db
            ),
            Err(e) => tracing::info!("Spectrum: {}", e),
        }
    }
    #[cfg(not(feature = "spectrum"))]
    let _ = transmitter;

    Ok(())
}

/// Send a frame of known bits and measure raw BER and masking depth.
fn measure_link(
    transmitter: &Transmitter,
    receiver: &Receiver,
    payload_len: usize,
) -> anyhow::Result<()> {
    let known = transmitter.encode(Priority::Routine, &vec![0u8; payload_len])?;
    let bed = synthesize_bed(known.signal.len() + 2_000, DEFAULT_BED_RMS)?;
    let masked = mask(&known.signal, &bed, &transmitter.profile().masking)?;

    let (_, decisions) = receiver.demodulate_bits(&masked.samples, known.frame_bits.len())?;
    let errors = decisions
        .iter()
        .zip(&known.frame_bits)
        .filter(|(d, &b)| d.bit != b)
        .count();
    tracing::info!(
        "Raw BER on a {}-bit known frame: {:.2e}",
        known.frame_bits.len(),
        errors as f64 / known.frame_bits.len() as f64
    );

    let clean: Vec<f32> = known
        .signal
        .iter()
        .map(|s| s * masked.signal_gain * masked.output_gain)
        .collect();
    let snr = estimate_snr(&masked.samples, &clean)?;
    tracing::info!("Measured signal-to-bed ratio: {:.2} dB", snr);
    Ok(())
}

fn protocol_zero(transmitter: &Transmitter, receiver: &Receiver) -> anyhow::Result<()> {
    let controller = ProtocolZero::new(Arc::clone(receiver.engine().vault()));
    tracing::info!("Protocol Zero: {}", controller.state());

    let challenge = controller.request_wipe()?;
    tracing::info!(
        "Wipe requested, confirm with {} within {:?}",
        challenge.code,
        challenge.expires_in
    );
    controller.confirm(&challenge.code)?;
    tracing::info!("Protocol Zero: {}", controller.state());

    let transmission = transmitter.transmit_over_noise(Priority::Flash, b"AFTER WIPE")?;
    match receiver.receive(&transmission.samples) {
        Ok(_) => bail!("receiver decoded after a wipe"),
        Err(e) => tracing::info!("Post-wipe receive refused: {}", e),
    }
    Ok(())
}
