//! Loot resolution.
//!
//! A kill rolls its NPC's drop table `drop_rolls` times. Each roll walks the
//! table graph: draw a seed in `[0, DROP_SCALE)`, pick the first entry whose
//! threshold reaches the (rate-adjusted) seed, descend into sub-tables, and
//! stop at a droppable item. The walk is an iteration with a hard attempt
//! ceiling, so self-referencing or all-zero tables still terminate.

use std::sync::Arc;

use log::{debug, warn};
use rand::Rng;

use aisim_shared::{DropEntry, DropTable, ItemDef, DROP_SCALE, Vec2};

use crate::config::SimConfig;
use crate::content::WorldContent;
use crate::entities::Monster;
use crate::error::SimError;
use crate::services::{Inventory, RewardItem, Sessions, WorldDrop};

/// Attempts one roll may spend on misses, descents and rerolls
pub const MAX_DROP_RETRIES: u32 = 100;

/// Scaled drop mass above which thresholds are stretched instead of the seed
/// shrunk. A table whose mass is below it never gets more than 90% drop
/// chance from rate bonuses alone.
pub const DROP_RATE_CEILING: f64 = 900.0;

/// Cumulative thresholds of upgrade levels +0 to +4
const PLUS_LADDER: [u32; 5] = [600, 850, 950, 990, 1000];

/// Offsets of consecutive world drops around the kill spot
const DROP_RING: [(f32, f32); 9] = [
    (0.0, 0.0),
    (1.0, 0.0),
    (0.0, 1.0),
    (-1.0, 0.0),
    (0.0, -1.0),
    (1.0, 1.0),
    (-1.0, 1.0),
    (-1.0, -1.0),
    (1.0, -1.0),
];

/// Player the loot goes to
#[derive(Debug, Clone, Copy)]
pub struct Claimer {
    pub id: u64,
    pub drop_multiplier: f64,
}

/// Where and for whom a drop burst happens
#[derive(Debug, Clone, Copy)]
pub struct DropSite {
    pub server: u16,
    pub map: u32,
    pub position: Vec2,
    pub boss: bool,
}

/// Pick the entry a seed lands on, `None` for the implicit "no drop" bucket.
///
/// While the rate-scaled drop mass stays within `DROP_RATE_CEILING` the seed
/// is divided by the rate. Past it, the thresholds are stretched to the
/// ceiling and the raw seed is used.
pub fn pick_entry(table: &DropTable, seed: u32, rate: f64) -> Option<usize> {
    if !(rate > 0.0) || !rate.is_finite() {
        return None;
    }
    let total = f64::from(table.total());
    let index = if total * rate <= DROP_RATE_CEILING {
        let scaled = f64::from(seed) / rate;
        table.probabilities.partition_point(|&p| f64::from(p) < scaled)
    } else {
        let stretch = total.max(DROP_RATE_CEILING) / total;
        let seed = f64::from(seed);
        table.probabilities.partition_point(|&p| f64::from(p) * stretch < seed)
    };
    (index < table.probabilities.len()).then_some(index)
}

/// Upgrade level for a seed in `[0, DROP_SCALE)`
pub fn plus_level(seed: u32) -> u8 {
    PLUS_LADDER.partition_point(|&threshold| threshold <= seed).min(PLUS_LADDER.len() - 1) as u8
}

#[derive(Debug, Default)]
struct Burst {
    successes: u32,
    ring: usize,
}

pub struct LootResolver {
    config: Arc<SimConfig>,
    content: Arc<dyn WorldContent>,
    sessions: Arc<dyn Sessions>,
    inventory: Arc<dyn Inventory>,
}

impl LootResolver {
    pub fn new(
        config: Arc<SimConfig>,
        content: Arc<dyn WorldContent>,
        sessions: Arc<dyn Sessions>,
        inventory: Arc<dyn Inventory>,
    ) -> Self {
        Self { config, content, sessions, inventory }
    }

    /// Drop rate multiplier for one claimer at one site
    pub fn effective_rate(&self, claimer: &Claimer, site: &DropSite) -> f64 {
        let mut rate = self.config.global_drop_rate * claimer.drop_multiplier + self.config.event_drop_bonus;
        if site.boss {
            rate += self.config.boss_drop_bonus;
        }
        if let Some(factor) = self.config.map_drop_overrides.get(&site.map) {
            rate *= factor;
        }
        rate
    }

    /// Loot of a monster kill, delivered to the claimer. A claimer that is
    /// unknown or offline gets nothing and nothing is mutated.
    pub fn resolve_kill(&self, monster: &Monster, claimer: Option<u64>, position: Vec2) -> Vec<RewardItem> {
        let Some(table) = monster.npc.drop_table else {
            return Vec::new();
        };
        let claimer = claimer
            .and_then(|id| self.sessions.player(id))
            .filter(|player| player.online)
            .map(|player| Claimer { id: player.id, drop_multiplier: player.drop_multiplier });
        let site = DropSite { server: monster.server, map: monster.map, position, boss: monster.npc.boss };

        let mut rng = rand::thread_rng();
        self.resolve(&mut rng, table, claimer.as_ref(), monster.npc.drop_rolls, &site)
    }

    /// Roll `rolls` times on `table_id` and deliver what comes out
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        table_id: u32,
        claimer: Option<&Claimer>,
        rolls: u32,
        site: &DropSite,
    ) -> Vec<RewardItem> {
        let Some(claimer) = claimer else {
            debug!("No claimer for drop table {}, skipping loot", table_id);
            return Vec::new();
        };
        let Some(root) = self.content.drop_table(table_id) else {
            warn!("Unknown drop table {}", table_id);
            return Vec::new();
        };

        let rate = self.effective_rate(claimer, site);
        let guaranteed = root.min_guaranteed;
        let rolls = rolls.max(guaranteed);
        let mut burst = Burst::default();
        let mut rewards = Vec::new();

        for _ in 0..rolls {
            let Some(item) = self.roll(rng, &root, rate, guaranteed, &burst) else {
                continue;
            };
            let reward = finish_item(rng, &item);
            burst.successes += 1;
            self.deliver(claimer, site, &mut burst, &item, reward.clone());
            rewards.push(reward);
        }
        rewards
    }

    /// One walk from `root`. While the burst is short of `guaranteed` items, a
    /// miss retries the table it happened on, sub-tables included.
    fn roll<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        root: &Arc<DropTable>,
        rate: f64,
        guaranteed: u32,
        burst: &Burst,
    ) -> Option<Arc<ItemDef>> {
        let mut table = root.clone();
        for _ in 0..MAX_DROP_RETRIES {
            if let Err(reason) = table.validate() {
                warn!("{}", SimError::MalformedDropTable { id: table.id, reason });
                return None;
            }

            let seed = rng.gen_range(0..DROP_SCALE);
            let entry = pick_entry(&table, seed, rate).and_then(|index| table.entries.get(index).copied());
            match entry {
                None if burst.successes < guaranteed => continue,
                None => return None,
                Some(DropEntry::Table(id)) => match self.content.drop_table(id) {
                    Some(next) => table = next,
                    None => {
                        warn!("Drop table {} chains to unknown table {}", table.id, id);
                        return None;
                    }
                },
                Some(DropEntry::Item(id)) => {
                    let Some(item) = self.content.item(id) else {
                        warn!("Drop table {} references unknown item {}", table.id, id);
                        return None;
                    };
                    if !item.item_type.is_kill_droppable() {
                        continue;
                    }
                    return Some(item);
                }
            }
        }
        debug!("Drop roll on table {} gave up after {} attempts", root.id, MAX_DROP_RETRIES);
        None
    }

    fn deliver(&self, claimer: &Claimer, site: &DropSite, burst: &mut Burst, item: &ItemDef, reward: RewardItem) {
        if item.item_type.drops_corporeally() {
            let (dx, dz) = DROP_RING[burst.ring % DROP_RING.len()];
            burst.ring += 1;
            self.inventory.spawn_world_drop(WorldDrop {
                item: reward,
                server: site.server,
                map: site.map,
                position: site.position + Vec2::new(dx, dz) * self.config.drop_ring_spacing,
                owner: claimer.id,
            });
        } else {
            self.inventory.give(claimer.id, reward);
        }
    }
}

fn finish_item<R: Rng + ?Sized>(rng: &mut R, item: &ItemDef) -> RewardItem {
    let plus = if item.item_type.rolls_plus() { plus_level(rng.gen_range(0..DROP_SCALE)) } else { 0 };
    RewardItem {
        item_id: item.id,
        quantity: item.charges.unwrap_or(1),
        plus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentFile, ContentStore};
    use crate::services::{ChannelBroadcaster, InMemoryInventory, SessionTable};
    use aisim_shared::get_item_definitions;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::time::Duration;

    fn table(id: u32, entries: Vec<DropEntry>, probabilities: Vec<u32>, min_guaranteed: u32) -> DropTable {
        DropTable { id, entries, probabilities, min_guaranteed }
    }

    fn items(ids: &[u32]) -> Vec<DropEntry> {
        ids.iter().map(|&id| DropEntry::Item(id)).collect()
    }

    struct Fixture {
        loot: LootResolver,
        inventory: Arc<InMemoryInventory>,
    }

    fn fixture(tables: Vec<DropTable>, config: SimConfig) -> Fixture {
        let (broadcaster, _rx) = ChannelBroadcaster::new(1024);
        let inventory = Arc::new(InMemoryInventory::new(
            Arc::new(broadcaster),
            Duration::from_secs(30),
            Duration::from_secs(90),
        ));
        let content = ContentStore::from_parts(ContentFile {
            drop_tables: tables,
            items: get_item_definitions(),
            ..Default::default()
        });
        let loot = LootResolver::new(
            Arc::new(config),
            Arc::new(content),
            Arc::new(SessionTable::new()),
            inventory.clone(),
        );
        Fixture { loot, inventory }
    }

    const CLAIMER: Claimer = Claimer { id: 7, drop_multiplier: 1.0 };

    fn site(boss: bool) -> DropSite {
        DropSite { server: 1, map: 1, position: Vec2::new(10.0, 10.0), boss }
    }

    #[test]
    fn test_pick_entry_direct() {
        let t = table(1, items(&[1, 2, 4, 5]), vec![150, 250, 350, 400], 0);
        assert_eq!(pick_entry(&t, 0, 1.0), Some(0));
        assert_eq!(pick_entry(&t, 150, 1.0), Some(0));
        assert_eq!(pick_entry(&t, 151, 1.0), Some(1));
        assert_eq!(pick_entry(&t, 400, 1.0), Some(3));
        assert_eq!(pick_entry(&t, 401, 1.0), None);

        // doubling the rate halves the seed
        assert_eq!(pick_entry(&t, 300, 2.0), Some(0));
        assert_eq!(pick_entry(&t, 800, 2.0), Some(3));
        assert_eq!(pick_entry(&t, 802, 2.0), None);

        assert_eq!(pick_entry(&t, 0, 0.0), None);
        assert_eq!(pick_entry(&t, 0, -1.0), None);
    }

    #[test]
    fn test_pick_entry_at_the_rate_ceiling() {
        // exactly at the ceiling the seed is scaled
        let at = table(1, items(&[1, 2]), vec![200, 450], 0);
        assert_eq!(pick_entry(&at, 899, 2.0), Some(1));
        assert_eq!(pick_entry(&at, 900, 2.0), Some(1));
        assert_eq!(pick_entry(&at, 901, 2.0), None);

        // above it thresholds are stretched to the ceiling
        let above = table(2, items(&[1, 2]), vec![250, 500], 0);
        assert_eq!(pick_entry(&above, 449, 2.0), Some(0));
        assert_eq!(pick_entry(&above, 451, 2.0), Some(1));
        assert_eq!(pick_entry(&above, 900, 2.0), Some(1));
        assert_eq!(pick_entry(&above, 901, 2.0), None);

        // a full table stays full
        let full = table(3, items(&[1]), vec![1000], 0);
        assert_eq!(pick_entry(&full, 999, 1.0), Some(0));
        assert_eq!(pick_entry(&full, 999, 3.0), Some(0));
    }

    #[test]
    fn test_plus_ladder() {
        assert_eq!(plus_level(0), 0);
        assert_eq!(plus_level(599), 0);
        assert_eq!(plus_level(600), 1);
        assert_eq!(plus_level(949), 2);
        assert_eq!(plus_level(989), 3);
        assert_eq!(plus_level(999), 4);
    }

    #[test]
    fn test_effective_rate() {
        let mut config = SimConfig {
            global_drop_rate: 2.0,
            boss_drop_bonus: 0.5,
            event_drop_bonus: 0.25,
            ..Default::default()
        };
        config.map_drop_overrides.insert(9, 0.5);
        let f = fixture(vec![], config);
        let claimer = Claimer { id: 1, drop_multiplier: 1.5 };

        assert_eq!(f.loot.effective_rate(&claimer, &site(false)), 3.25);
        assert_eq!(f.loot.effective_rate(&claimer, &site(true)), 3.75);
        let mut dungeon = site(true);
        dungeon.map = 9;
        assert_eq!(f.loot.effective_rate(&claimer, &dungeon), 1.875);
    }

    #[test]
    fn test_missing_claimer_mutates_nothing() {
        let f = fixture(vec![table(1, items(&[2]), vec![1000], 0)], SimConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(f.loot.resolve(&mut rng, 1, None, 5, &site(false)).is_empty());
        assert!(f.inventory.bag(7).is_empty());
        assert!(f.inventory.world_items().is_empty());
    }

    #[test]
    fn test_all_zero_table_terminates() {
        let zero = table(1, items(&[2, 2]), vec![0, 0], 50);
        let looping = table(2, vec![DropEntry::Table(2)], vec![1000], 0);
        let f = fixture(vec![zero, looping], SimConfig::default());
        let mut rng = StdRng::seed_from_u64(2);

        for _ in 0..20 {
            let rewards = f.loot.resolve(&mut rng, 1, Some(&CLAIMER), 1, &site(false));
            assert!(rewards.len() <= 50);
            assert!(f.loot.resolve(&mut rng, 2, Some(&CLAIMER), 3, &site(false)).is_empty());
        }
    }

    #[test]
    fn test_quest_and_material_items_are_rerolled() {
        // item 3 is a quest item, item 6 a crafting material, item 2 a potion
        let f = fixture(vec![table(1, items(&[3, 6, 2]), vec![400, 800, 1000], 0)], SimConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let rewards = f.loot.resolve(&mut rng, 1, Some(&CLAIMER), 200, &site(false));
        assert!(!rewards.is_empty());
        assert!(rewards.iter().all(|r| r.item_id == 2));
        assert_eq!(f.inventory.bag(CLAIMER.id).len(), rewards.len());
    }

    #[tokio::test]
    async fn test_boss_table_guarantees_its_minimum() {
        let store = ContentStore::with_defaults();
        let boss_table = store.drop_table(10).unwrap();
        let sub_table = store.drop_table(2).unwrap();
        let f = fixture(vec![(*boss_table).clone(), (*sub_table).clone()], SimConfig::default());

        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rewards = f.loot.resolve(&mut rng, 10, Some(&CLAIMER), 1, &site(true));
            assert!(rewards.len() >= 2, "seed {} produced {:?}", seed, rewards);
        }
    }

    #[tokio::test]
    async fn test_guarantee_holds_inside_chained_tables() {
        // the sub-table misses half the time and guarantees nothing itself
        let root = table(20, vec![DropEntry::Table(21)], vec![1000], 2);
        let sub = table(21, items(&[4]), vec![500], 0);
        let f = fixture(vec![root, sub], SimConfig::default());

        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rewards = f.loot.resolve(&mut rng, 20, Some(&CLAIMER), 1, &site(false));
            assert_eq!(rewards.len(), 2, "seed {} produced {:?}", seed, rewards);
        }
    }

    #[tokio::test]
    async fn test_post_processing_and_delivery() {
        // 1: potion with charges, 4: weapon, 8: relic
        let tables = vec![
            table(1, items(&[1]), vec![1000], 0),
            table(2, items(&[4]), vec![1000], 0),
            table(3, items(&[8]), vec![1000], 0),
        ];
        let f = fixture(tables, SimConfig::default());
        let mut rng = StdRng::seed_from_u64(4);

        let potions = f.loot.resolve(&mut rng, 1, Some(&CLAIMER), 1, &site(false));
        assert_eq!(potions, vec![RewardItem { item_id: 1, quantity: 50, plus: 0 }]);
        assert_eq!(f.inventory.bag(CLAIMER.id), potions);

        let weapons = f.loot.resolve(&mut rng, 2, Some(&CLAIMER), 9, &site(false));
        assert_eq!(weapons.len(), 9);
        assert!(weapons.iter().all(|w| w.plus <= 4 && w.quantity == 1));

        let relics = f.loot.resolve(&mut rng, 3, Some(&CLAIMER), 4, &site(false));
        assert!(relics.iter().all(|r| r.plus == 0));

        let ground = f.inventory.world_items();
        assert_eq!(ground.len(), 13);
        assert!(ground.iter().all(|item| item.drop.owner == CLAIMER.id));

        // one burst of nine never stacks two drops on the same spot
        let spots: HashSet<(i32, i32)> = ground
            .iter()
            .filter(|item| item.drop.item.item_id == 4)
            .map(|item| (item.drop.position.x as i32, item.drop.position.z as i32))
            .collect();
        assert_eq!(spots.len(), 9);
    }
}
