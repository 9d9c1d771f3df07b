//! Pre-flattening numeric block ids mapped to modern block states.
//!
//! MCEdit files written without a name mapping store each cell as a numeric
//! id plus a 4-bit metadata nibble.  [`legacy_state`] resolves a pair in
//! three steps:
//!   1. ids whose metadata encodes state (facing, half, age, colour and so
//!      on) are decoded bit by bit into a modern name and properties;
//!   2. otherwise `id:data` is looked up among the material variants;
//!   3. otherwise the base block for `id` is used.
//!
//! Ids the numeric era never assigned yield `None`.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::model::BlockState;

// ── Tables ───────────────────────────────────────────────────────────────────

/// Base block for every numeric id; empty strings were never assigned.
static BASE: [&str; 256] = [
    // 0
    "air", "stone", "grass_block", "dirt", "cobblestone", "oak_planks", "oak_sapling", "bedrock",
    "water", "water", "lava", "lava", "sand", "gravel", "gold_ore", "iron_ore",
    // 16
    "coal_ore", "oak_log", "oak_leaves", "sponge", "glass", "lapis_ore", "lapis_block", "dispenser",
    "sandstone", "note_block", "red_bed", "powered_rail", "detector_rail", "sticky_piston", "cobweb", "grass",
    // 32
    "dead_bush", "piston", "piston_head", "white_wool", "moving_piston", "dandelion", "poppy", "brown_mushroom",
    "red_mushroom", "gold_block", "iron_block", "smooth_stone_slab", "smooth_stone_slab", "bricks", "tnt", "bookshelf",
    // 48
    "mossy_cobblestone", "obsidian", "torch", "fire", "spawner", "oak_stairs", "chest", "redstone_wire",
    "diamond_ore", "diamond_block", "crafting_table", "wheat", "farmland", "furnace", "furnace", "oak_sign",
    // 64
    "oak_door", "ladder", "rail", "cobblestone_stairs", "oak_wall_sign", "lever", "stone_pressure_plate", "iron_door",
    "oak_pressure_plate", "redstone_ore", "redstone_ore", "redstone_torch", "redstone_torch", "stone_button", "snow", "ice",
    // 80
    "snow_block", "cactus", "clay", "sugar_cane", "jukebox", "oak_fence", "carved_pumpkin", "netherrack",
    "soul_sand", "glowstone", "nether_portal", "jack_o_lantern", "cake", "repeater", "repeater", "white_stained_glass",
    // 96
    "oak_trapdoor", "infested_stone", "stone_bricks", "brown_mushroom_block", "red_mushroom_block", "iron_bars", "glass_pane", "melon",
    "pumpkin_stem", "melon_stem", "vine", "oak_fence_gate", "brick_stairs", "stone_brick_stairs", "mycelium", "lily_pad",
    // 112
    "nether_bricks", "nether_brick_fence", "nether_brick_stairs", "nether_wart", "enchanting_table", "brewing_stand", "cauldron", "end_portal",
    "end_portal_frame", "end_stone", "dragon_egg", "redstone_lamp", "redstone_lamp", "oak_slab", "oak_slab", "cocoa",
    // 128
    "sandstone_stairs", "emerald_ore", "ender_chest", "tripwire_hook", "tripwire", "emerald_block", "spruce_stairs", "birch_stairs",
    "jungle_stairs", "command_block", "beacon", "cobblestone_wall", "flower_pot", "carrots", "potatoes", "oak_button",
    // 144
    "skeleton_skull", "anvil", "trapped_chest", "light_weighted_pressure_plate", "heavy_weighted_pressure_plate", "comparator", "comparator", "daylight_detector",
    "redstone_block", "nether_quartz_ore", "hopper", "quartz_block", "quartz_stairs", "activator_rail", "dropper", "white_terracotta",
    // 160
    "white_stained_glass_pane", "acacia_leaves", "acacia_log", "acacia_stairs", "dark_oak_stairs", "slime_block", "barrier", "iron_trapdoor",
    "prismarine", "sea_lantern", "hay_block", "white_carpet", "terracotta", "coal_block", "packed_ice", "sunflower",
    // 176
    "white_banner", "white_wall_banner", "daylight_detector", "red_sandstone", "red_sandstone_stairs", "red_sandstone_slab", "red_sandstone_slab", "spruce_fence_gate",
    "birch_fence_gate", "jungle_fence_gate", "dark_oak_fence_gate", "acacia_fence_gate", "spruce_fence", "birch_fence", "jungle_fence", "dark_oak_fence",
    // 192
    "acacia_fence", "spruce_door", "birch_door", "jungle_door", "acacia_door", "dark_oak_door", "end_rod", "chorus_plant",
    "chorus_flower", "purpur_block", "purpur_pillar", "purpur_stairs", "purpur_slab", "purpur_slab", "end_stone_bricks", "beetroots",
    // 208
    "dirt_path", "end_gateway", "repeating_command_block", "chain_command_block", "frosted_ice", "magma_block", "nether_wart_block", "red_nether_bricks",
    "bone_block", "structure_void", "observer", "white_shulker_box", "orange_shulker_box", "magenta_shulker_box", "light_blue_shulker_box", "yellow_shulker_box",
    // 224
    "lime_shulker_box", "pink_shulker_box", "gray_shulker_box", "light_gray_shulker_box", "cyan_shulker_box", "purple_shulker_box", "blue_shulker_box", "brown_shulker_box",
    "green_shulker_box", "red_shulker_box", "black_shulker_box", "white_glazed_terracotta", "orange_glazed_terracotta", "magenta_glazed_terracotta", "light_blue_glazed_terracotta", "yellow_glazed_terracotta",
    // 240
    "lime_glazed_terracotta", "pink_glazed_terracotta", "gray_glazed_terracotta", "light_gray_glazed_terracotta", "cyan_glazed_terracotta", "purple_glazed_terracotta", "blue_glazed_terracotta", "brown_glazed_terracotta",
    "green_glazed_terracotta", "red_glazed_terracotta", "black_glazed_terracotta", "white_concrete", "white_concrete_powder", "", "", "structure_block",
];

/// Material variants whose metadata only selects a different block.
static VARIANTS: &[(u16, u8, &str)] = &[
    (1,   1, "granite"),
    (1,   2, "polished_granite"),
    (1,   3, "diorite"),
    (1,   4, "polished_diorite"),
    (1,   5, "andesite"),
    (1,   6, "polished_andesite"),
    (3,   1, "coarse_dirt"),
    (3,   2, "podzol"),
    (5,   1, "spruce_planks"),
    (5,   2, "birch_planks"),
    (5,   3, "jungle_planks"),
    (5,   4, "acacia_planks"),
    (5,   5, "dark_oak_planks"),
    (12,  1, "red_sand"),
    (19,  1, "wet_sponge"),
    (24,  1, "chiseled_sandstone"),
    (24,  2, "cut_sandstone"),
    (31,  0, "dead_bush"),
    (31,  2, "fern"),
    (38,  1, "blue_orchid"),
    (38,  2, "allium"),
    (38,  3, "azure_bluet"),
    (38,  4, "red_tulip"),
    (38,  5, "orange_tulip"),
    (38,  6, "white_tulip"),
    (38,  7, "pink_tulip"),
    (38,  8, "oxeye_daisy"),
    (97,  1, "infested_cobblestone"),
    (97,  2, "infested_stone_bricks"),
    (97,  3, "infested_mossy_stone_bricks"),
    (97,  4, "infested_cracked_stone_bricks"),
    (97,  5, "infested_chiseled_stone_bricks"),
    (98,  1, "mossy_stone_bricks"),
    (98,  2, "cracked_stone_bricks"),
    (98,  3, "chiseled_stone_bricks"),
    (139, 1, "mossy_cobblestone_wall"),
    (168, 1, "prismarine_bricks"),
    (168, 2, "dark_prismarine"),
    (179, 1, "chiseled_red_sandstone"),
    (179, 2, "cut_red_sandstone"),
];

const COLORS: [&str; 16] = [
    "white", "orange", "magenta", "light_blue", "yellow", "lime", "pink", "gray",
    "light_gray", "cyan", "purple", "blue", "brown", "green", "red", "black",
];

const WOODS: [&str; 6] = ["oak", "spruce", "birch", "jungle", "acacia", "dark_oak"];

/// Horizontal facing by its 2-bit index.
const HORIZONTAL: [&str; 4] = ["south", "west", "north", "east"];

/// Six-way facing in the low three bits; 6 and 7 are unused.
const FACING6: [&str; 6] = ["down", "up", "north", "south", "west", "east"];

const RAIL_SHAPES: [&str; 10] = [
    "north_south", "east_west", "ascending_east", "ascending_west", "ascending_north",
    "ascending_south", "south_east", "south_west", "north_west", "north_east",
];

const SLAB_KINDS: [&str; 8] = [
    "smooth_stone", "sandstone", "petrified_oak", "cobblestone",
    "brick", "stone_brick", "nether_brick", "quartz",
];

const DOUBLE_PLANTS: [&str; 6] = ["sunflower", "lilac", "tall_grass", "large_fern", "rose_bush", "peony"];

fn variants() -> &'static HashMap<(u16, u8), &'static str> {
    static TABLE: OnceLock<HashMap<(u16, u8), &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| VARIANTS.iter().map(|&(id, data, name)| ((id, data), name)).collect())
}

// ── Bit helpers ──────────────────────────────────────────────────────────────

fn block(name: &str) -> BlockState {
    BlockState::from_name(format!("minecraft:{name}"))
}

fn flag(data: u8, mask: u8) -> &'static str {
    if data & mask != 0 { "true" } else { "false" }
}

fn horizontal(data: u8) -> &'static str {
    HORIZONTAL[(data & 3) as usize]
}

fn six_way(data: u8) -> Option<&'static str> {
    FACING6.get((data & 7) as usize).copied()
}

/// Facing stored as 2..=5 by chests, ladders, wall signs and furnaces.
fn wall_facing(data: u8) -> &'static str {
    match data & 7 {
        3 => "south",
        4 => "west",
        5 => "east",
        _ => "north",
    }
}

fn wood(index: u8) -> &'static str {
    WOODS.get(index as usize).copied().unwrap_or("oak")
}

/// Pillar axis in bits 2-3; `None` for the all-bark value.
fn pillar_axis(data: u8) -> Option<&'static str> {
    match (data >> 2) & 3 {
        0 => Some("y"),
        1 => Some("x"),
        2 => Some("z"),
        _ => None,
    }
}

fn slab(kind: &str, kind_of: &str) -> BlockState {
    block(&format!("{kind}_slab")).with_property("type", kind_of)
}

fn slab_half(data: u8) -> &'static str {
    if data & 8 != 0 { "top" } else { "bottom" }
}

// ── Families ─────────────────────────────────────────────────────────────────

/// Decode ids whose metadata carries block state.  `None` for ids that
/// are plain blocks or material variants.
fn decode_family(id: u16, d: u8) -> Option<BlockState> {
    let base = || block(BASE[id as usize]);
    let state = match id {
        6 => block(&format!("{}_sapling", wood(d & 7))).with_property("stage", if d & 8 != 0 { "1" } else { "0" }),
        8..=11 => base().with_property("level", (d & 15).to_string()),
        17 | 162 => {
            let kind = if id == 17 { wood(d & 3) } else { wood(4 + (d & 1)) };
            match pillar_axis(d) {
                Some(axis) => block(&format!("{kind}_log")).with_property("axis", axis),
                None => block(&format!("{kind}_wood")).with_property("axis", "y"),
            }
        }
        18 | 161 => {
            let kind = if id == 18 { wood(d & 3) } else { wood(4 + (d & 1)) };
            block(&format!("{kind}_leaves"))
                .with_property("persistent", flag(d, 4))
                .with_property("distance", "7")
        }
        23 | 158 => base().with_property("facing", six_way(d)?).with_property("triggered", flag(d, 8)),
        26 => base()
            .with_property("facing", horizontal(d))
            .with_property("part", if d & 8 != 0 { "head" } else { "foot" })
            .with_property("occupied", flag(d, 4)),
        27 | 28 | 157 => {
            let shape = RAIL_SHAPES[..6].get((d & 7) as usize).copied().unwrap_or("north_south");
            base().with_property("shape", shape).with_property("powered", flag(d, 8))
        }
        66 => base().with_property("shape", RAIL_SHAPES.get(d as usize).copied().unwrap_or("north_south")),
        29 | 33 => base().with_property("facing", six_way(d)?).with_property("extended", flag(d, 8)),
        34 => base()
            .with_property("facing", six_way(d)?)
            .with_property("type", if d & 8 != 0 { "sticky" } else { "normal" })
            .with_property("short", "false"),
        35 | 95 | 159 | 160 | 171 | 251 | 252 => {
            let suffix = match id {
                35  => "wool",
                95  => "stained_glass",
                159 => "terracotta",
                160 => "stained_glass_pane",
                171 => "carpet",
                251 => "concrete",
                _   => "concrete_powder",
            };
            block(&format!("{}_{suffix}", COLORS[(d & 15) as usize]))
        }
        43 => slab(SLAB_KINDS[(d & 7) as usize], "double"),
        44 => slab(SLAB_KINDS[(d & 7) as usize], slab_half(d)),
        125 => slab(wood(d & 7), "double"),
        126 => slab(wood(d & 7), slab_half(d)),
        181 | 204 => base().with_property("type", "double"),
        182 | 205 => base().with_property("type", slab_half(d)),
        50 | 75 | 76 => {
            let lit = if id == 75 { "false" } else { "true" };
            let wall = match d & 7 {
                1 => Some("east"),
                2 => Some("west"),
                3 => Some("south"),
                4 => Some("north"),
                _ => None,
            };
            match (id, wall) {
                (50, Some(facing)) => block("wall_torch").with_property("facing", facing),
                (50, None)         => block("torch"),
                (_, Some(facing))  => block("redstone_wall_torch").with_property("facing", facing).with_property("lit", lit),
                (_, None)          => block("redstone_torch").with_property("lit", lit),
            }
        }
        51 => base().with_property("age", (d & 15).to_string()),
        53 | 67 | 108 | 109 | 114 | 128 | 134 | 135 | 136 | 156 | 163 | 164 | 180 | 203 => {
            let facing = ["east", "west", "south", "north"][(d & 3) as usize];
            base()
                .with_property("facing", facing)
                .with_property("half", if d & 4 != 0 { "top" } else { "bottom" })
                .with_property("shape", "straight")
        }
        54 | 146 => base().with_property("facing", wall_facing(d)).with_property("type", "single"),
        65 | 68 | 130 | 177 => base().with_property("facing", wall_facing(d)),
        61 | 62 => base().with_property("facing", wall_facing(d)).with_property("lit", if id == 62 { "true" } else { "false" }),
        63 | 176 => base().with_property("rotation", (d & 15).to_string()),
        55 => base().with_property("power", (d & 15).to_string()),
        59 | 141 | 142 | 104 | 105 => base().with_property("age", (d & 7).to_string()),
        115 | 207 => base().with_property("age", (d & 3).to_string()),
        60 => base().with_property("moisture", (d & 7).to_string()),
        64 | 71 | 193..=197 => {
            if d & 8 != 0 {
                base()
                    .with_property("half", "upper")
                    .with_property("hinge", if d & 1 != 0 { "right" } else { "left" })
                    .with_property("powered", flag(d, 2))
            } else {
                base()
                    .with_property("half", "lower")
                    .with_property("facing", ["east", "south", "west", "north"][(d & 3) as usize])
                    .with_property("open", flag(d, 4))
            }
        }
        69 => {
            let (face, facing) = match d & 7 {
                0 => ("ceiling", "west"),
                1 => ("wall", "east"),
                2 => ("wall", "west"),
                3 => ("wall", "south"),
                4 => ("wall", "north"),
                5 => ("floor", "north"),
                6 => ("floor", "west"),
                _ => ("ceiling", "north"),
            };
            base().with_property("face", face).with_property("facing", facing).with_property("powered", flag(d, 8))
        }
        77 | 143 => {
            let (face, facing) = match d & 7 {
                0 => ("ceiling", "north"),
                1 => ("wall", "east"),
                2 => ("wall", "west"),
                3 => ("wall", "south"),
                4 => ("wall", "north"),
                _ => ("floor", "north"),
            };
            base().with_property("face", face).with_property("facing", facing).with_property("powered", flag(d, 8))
        }
        70 | 72 => base().with_property("powered", flag(d, 1)),
        147 | 148 => base().with_property("power", (d & 15).to_string()),
        78 => base().with_property("layers", ((d & 7) + 1).to_string()),
        81 | 83 => base().with_property("age", (d & 15).to_string()),
        86 | 91 => base().with_property("facing", horizontal(d)),
        92 => base().with_property("bites", (d & 7).min(6).to_string()),
        93 | 94 => base()
            .with_property("facing", horizontal(d))
            .with_property("delay", (((d >> 2) & 3) + 1).to_string())
            .with_property("powered", if id == 94 { "true" } else { "false" }),
        96 | 167 => base()
            .with_property("facing", ["north", "south", "west", "east"][(d & 3) as usize])
            .with_property("open", flag(d, 4))
            .with_property("half", slab_half(d)),
        106 => base()
            .with_property("south", flag(d, 1))
            .with_property("west", flag(d, 2))
            .with_property("north", flag(d, 4))
            .with_property("east", flag(d, 8))
            .with_property("up", "false"),
        107 | 183..=187 => base()
            .with_property("facing", horizontal(d))
            .with_property("open", flag(d, 4))
            .with_property("powered", flag(d, 8))
            .with_property("in_wall", "false"),
        117 => base()
            .with_property("has_bottle_0", flag(d, 1))
            .with_property("has_bottle_1", flag(d, 2))
            .with_property("has_bottle_2", flag(d, 4)),
        118 => match d & 3 {
            0 => base(),
            level => block("water_cauldron").with_property("level", level.to_string()),
        },
        120 => base().with_property("facing", horizontal(d)).with_property("eye", flag(d, 4)),
        127 => base().with_property("facing", horizontal(d)).with_property("age", ((d >> 2) & 3).min(2).to_string()),
        131 => base()
            .with_property("facing", horizontal(d))
            .with_property("attached", flag(d, 4))
            .with_property("powered", flag(d, 8)),
        145 => {
            let name = match (d >> 2) & 3 {
                0 => "anvil",
                1 => "chipped_anvil",
                _ => "damaged_anvil",
            };
            block(name).with_property("facing", horizontal(d))
        }
        149 | 150 => base()
            .with_property("facing", horizontal(d))
            .with_property("mode", if d & 4 != 0 { "subtract" } else { "compare" })
            .with_property("powered", flag(d, 8)),
        151 | 178 => base()
            .with_property("power", (d & 15).to_string())
            .with_property("inverted", if id == 178 { "true" } else { "false" }),
        154 => {
            let facing = match d & 7 {
                2..=5 => wall_facing(d),
                _ => "down",
            };
            base().with_property("facing", facing).with_property("enabled", if d & 8 != 0 { "false" } else { "true" })
        }
        155 => match d & 7 {
            1 => block("chiseled_quartz_block"),
            2 => block("quartz_pillar").with_property("axis", "y"),
            3 => block("quartz_pillar").with_property("axis", "x"),
            4 => block("quartz_pillar").with_property("axis", "z"),
            _ => base(),
        },
        170 | 202 | 216 => base().with_property("axis", pillar_axis(d).unwrap_or("y")),
        175 => {
            if d & 8 != 0 {
                block(DOUBLE_PLANTS[0]).with_property("half", "upper")
            } else {
                let kind = DOUBLE_PLANTS.get((d & 7) as usize).copied().unwrap_or(DOUBLE_PLANTS[0]);
                block(kind).with_property("half", "lower")
            }
        }
        198 | 219..=234 => base().with_property("facing", six_way(d)?),
        218 => base().with_property("facing", six_way(d)?).with_property("powered", flag(d, 8)),
        235..=250 => base().with_property("facing", horizontal(d)),
        _ => return None,
    };
    Some(state)
}

/// Modern state for a legacy `(id, data)` pair.
///
/// Falls back from the decoded family to the `id:data` variant to the base
/// block; `None` only for ids that were never assigned.
pub fn legacy_state(id: u16, data: u8) -> Option<BlockState> {
    let base = *BASE.get(id as usize)?;
    if base.is_empty() {
        return None;
    }
    let data = data & 0x0F;
    if let Some(state) = decode_family(id, data) {
        return Some(state);
    }
    if let Some(name) = variants().get(&(id, data)) {
        return Some(block(name));
    }
    Some(block(base))
}
