//! Locating the ALSA card the kernel creates for the UAC2 function

use super::log::GadgetLog;
use super::udc::GadgetTiming;
use crate::error::{AppError, Result};
use crate::shell::{CommandBatch, PrivilegedExecutor};

/// Driver name of the gadget's sound card in `/proc/asound/cards`
pub const GADGET_CARD_NAME: &str = "UAC2Gadget";

const ASOUND_CARDS: &str = "/proc/asound/cards";

pub fn capture_node(card: u32) -> String {
    format!("/dev/snd/pcmC{}D0c", card)
}

pub fn playback_node(card: u32) -> String {
    format!("/dev/snd/pcmC{}D0p", card)
}

/// Index of the gadget card from the contents of `/proc/asound/cards`
///
/// ```text
///  0 [sm8250tmtsndcar]: sm8250-tmt-snd- - sm8250-tmt-snd-card
///  1 [UAC2Gadget     ]: UAC2_Gadget - UAC2_Gadget
/// ```
pub fn parse_gadget_card(cards: &str) -> Option<u32> {
    let needle = GADGET_CARD_NAME.to_lowercase();
    cards
        .lines()
        .filter(|line| line.to_lowercase().contains(&needle))
        .find_map(|line| line.split_whitespace().next()?.parse().ok())
}

/// Find the gadget card and open its PCM nodes to the audio engine
///
/// The chmod is repeated because udev may still be creating the nodes.
pub async fn find_and_prepare_card(
    exec: &PrivilegedExecutor,
    timing: &GadgetTiming,
    log: &GadgetLog,
) -> Result<u32> {
    log.info("Scanning for UAC2 audio card...");

    let cards = exec.read(format!("cat {}", ASOUND_CARDS)).await;
    let Some(card) = parse_gadget_card(&cards) else {
        log.warn("UAC2 card not found. Is USB connected?");
        return Err(AppError::CardNotFound);
    };

    let capture = capture_node(card);
    if !exec.check(format!("test -e {}", capture)).await {
        log.warn(format!("Card {} found, but {} is missing.", card, capture));
        return Err(AppError::CardNotFound);
    }

    let mut chmod = CommandBatch::with_capacity(2);
    chmod
        .tolerated(format!("chmod 666 {}", capture))
        .tolerated(format!("chmod 666 {}", playback_node(card)));
    for _ in 0..timing.card_chmod_rounds {
        exec.run(&chmod).await;
        tokio::time::sleep(timing.card_chmod_interval).await;
    }

    log.info(format!("UAC2 driver found at card {}", card));
    Ok(card)
}
