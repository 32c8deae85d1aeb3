//! Render list derivation
//!
//! Flattens an [`ExperimentState`] into the ordered list of content items
//! shown on screen. The list is always rebuilt from scratch; callers diff
//! successive lists with [`crate::diff::diff`].

use crate::models::{ContentItem, ExperimentState, Field, Phase};

/// Hint that opens a new field group; the sentinel's value is the title
pub const GROUP_SENTINEL: &str = "#group";

/// Sentinel spelling used by older experiment servers
pub const LEGACY_GROUP_SENTINEL: &str = "#info_group";

/// Background colors for field groups, cycled by encounter order
pub const GROUP_PALETTE: [&str; 3] = ["#FFFFF7D3", "#FFE8FAE5", "#FFDCF0F2"];

pub const INTEL_HEADING: &str = "public intel";
pub const CHOOSE_HEADING: &str = "choose";
pub const ENDED_HEADING: &str = "The experiment has ended. Thank you for participating.";
pub const PENDING_HEADING: &str = "Processing, please wait for the next round...";

/// Spacer appended after the choices so the list can scroll past them
pub const TRAILING_SPACER: ContentItem = ContentItem::Spacer {
    width: 0,
    height: 20,
};

pub fn is_group_sentinel(field: &Field) -> bool {
    field.hint == GROUP_SENTINEL || field.hint == LEGACY_GROUP_SENTINEL
}

/// Derive the render list for a state
pub fn derive_render_list(state: &ExperimentState) -> Vec<ContentItem> {
    match state.phase {
        Phase::Ended => vec![ContentItem::heading(ENDED_HEADING)],
        Phase::Pending => vec![ContentItem::heading(PENDING_HEADING)],
        Phase::Running => {
            let mut items = Vec::with_capacity(state.items.len() + state.images.len() + 4);
            items.push(ContentItem::heading(INTEL_HEADING));
            items.extend(group_fields(&state.items));
            items.extend(state.images.iter().cloned().map(ContentItem::Image));
            items.push(ContentItem::heading(CHOOSE_HEADING));
            items.push(ContentItem::Choices(state.options.clone()));
            items.push(TRAILING_SPACER);
            items
        }
    }
}

/// Fold sentinel-delimited runs of fields into groups
///
/// Fields before the first sentinel stay ungrouped. A sentinel absorbs every
/// following field up to the next sentinel or the end of the sequence.
pub fn group_fields(fields: &[Field]) -> Vec<ContentItem> {
    let mut items = Vec::new();
    let mut current: Option<(String, Vec<Field>)> = None;
    let mut groups_seen = 0usize;

    let mut flush = |current: &mut Option<(String, Vec<Field>)>, items: &mut Vec<ContentItem>| {
        if let Some((title, fields)) = current.take() {
            items.push(ContentItem::FieldGroup {
                title,
                fields,
                color_index: groups_seen % GROUP_PALETTE.len(),
            });
            groups_seen += 1;
        }
    };

    for field in fields {
        if is_group_sentinel(field) {
            flush(&mut current, &mut items);
            current = Some((field.value.clone(), Vec::new()));
        } else if let Some((_, group)) = current.as_mut() {
            group.push(field.clone());
        } else {
            items.push(ContentItem::Field(field.clone()));
        }
    }
    flush(&mut current, &mut items);

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChoiceSet, ImageRef};

    fn running_state(items: Vec<Field>) -> ExperimentState {
        ExperimentState {
            items,
            images: vec![ImageRef::new("http://lab/images/1.png")],
            options: ChoiceSet::new(["north", "south"]),
            phase: Phase::Running,
        }
    }

    #[test]
    fn test_ended_is_single_heading() {
        let mut state = running_state(vec![Field::new("a", "1")]);
        state.phase = Phase::Ended;

        assert_eq!(
            derive_render_list(&state),
            vec![ContentItem::heading(ENDED_HEADING)]
        );
    }

    #[test]
    fn test_pending_is_single_heading() {
        let state = ExperimentState::with_phase(Phase::Pending);
        assert_eq!(
            derive_render_list(&state),
            vec![ContentItem::heading(PENDING_HEADING)]
        );
    }

    #[test]
    fn test_running_layout() {
        let state = running_state(vec![Field::new("round", "1/6")]);
        let list = derive_render_list(&state);

        assert_eq!(
            list,
            vec![
                ContentItem::heading(INTEL_HEADING),
                ContentItem::field("round", "1/6"),
                ContentItem::Image(ImageRef::new("http://lab/images/1.png")),
                ContentItem::heading(CHOOSE_HEADING),
                ContentItem::Choices(ChoiceSet::new(["north", "south"])),
                TRAILING_SPACER,
            ]
        );
    }

    #[test]
    fn test_grouping_absorbs_until_next_sentinel() {
        let fields = vec![
            Field::new("round", "2/6"),
            Field::new("#group", "history"),
            Field::new("r1", "won"),
            Field::new("r2", "lost"),
            Field::new("#info_group", "stats"),
            Field::new("wins", "1"),
        ];

        let items = group_fields(&fields);
        assert_eq!(
            items,
            vec![
                ContentItem::field("round", "2/6"),
                ContentItem::FieldGroup {
                    title: "history".to_string(),
                    fields: vec![Field::new("r1", "won"), Field::new("r2", "lost")],
                    color_index: 0,
                },
                ContentItem::FieldGroup {
                    title: "stats".to_string(),
                    fields: vec![Field::new("wins", "1")],
                    color_index: 1,
                },
            ]
        );
    }

    #[test]
    fn test_group_colors_cycle_through_palette() {
        let fields: Vec<Field> = (0..5)
            .map(|i| Field::new(GROUP_SENTINEL, format!("g{}", i)))
            .collect();

        let colors: Vec<usize> = group_fields(&fields)
            .into_iter()
            .map(|item| match item {
                ContentItem::FieldGroup {
                    fields,
                    color_index,
                    ..
                } => {
                    assert!(fields.is_empty());
                    color_index
                }
                other => panic!("Expected group, got {:?}", other),
            })
            .collect();

        assert_eq!(colors, vec![0, 1, 2, 0, 1]);
    }
}
