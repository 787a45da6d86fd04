//! Choosing the next server or hub to connect to.

use rand::Rng;

use crate::servers::{Directory, Encryption};

/// Pick a jump target from `dir` for `encryption`, avoiding `previous`.
///
/// Ranked by cached latency: a uniform pick among the `top_k` fastest
/// measured entries, else a uniform pick over every candidate, else over
/// the whole directory. `None` only when the directory is empty.
pub fn pick_jump_target<R: Rng + ?Sized>(
    dir: &Directory,
    encryption: Encryption,
    previous: Option<usize>,
    top_k: usize,
    rng: &mut R,
) -> Option<usize> {
    if dir.is_empty() {
        log::warn!("Jump requested but the directory is empty");
        return None;
    }

    let pool: Vec<usize> = dir
        .ids_supporting(encryption)
        .into_iter()
        .filter(|id| Some(*id) != previous)
        .collect();

    let ranked: Vec<(u32, usize)> = pool
        .iter()
        .filter_map(|&id| dir.latency(id).and_then(|l| l.millis()).map(|ms| (ms, id)))
        .collect();

    if let Some(id) = pick_from_ranked(ranked, top_k, rng) {
        log::debug!("Jump picked {} from latency ranking", id);
        return Some(id);
    }

    if !pool.is_empty() {
        let id = pool[rng.gen_range(0..pool.len())];
        log::debug!("No latency data, jump picked {} at random", id);
        return Some(id);
    }

    let id = rng.gen_range(0..dir.len());
    log::debug!("No candidates for {}, jump picked {} from the whole list", encryption, id);
    Some(id)
}

/// Uniform pick among the `k` lowest-latency pairs. The sort is stable so
/// equal latencies keep pool order.
pub fn pick_from_ranked<R: Rng + ?Sized>(
    mut ranked: Vec<(u32, usize)>,
    k: usize,
    rng: &mut R,
) -> Option<usize> {
    if ranked.is_empty() {
        return None;
    }
    ranked.sort_by_key(|(ms, _)| *ms);
    let k = k.max(1).min(ranked.len());
    Some(ranked[rng.gen_range(0..k)].1)
}
