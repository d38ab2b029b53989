//! Ready-made prompt templates grouped by genre.

/// A genre and its prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Genre {
    pub name: &'static str,
    pub prompts: &'static [&'static str],
}

pub static GENRES: &[Genre] = &[
    Genre {
        name: "Pop",
        prompts: &[
            "Upbeat pop chorus with a bright synth hook and a four-on-the-floor kick.",
            "Modern pop verse with warm electric piano and a tight, clipped drum groove.",
            "Danceable pop anthem drum loop with handclaps on every backbeat.",
            "Pop bridge that strips back to vocal pads before a big final chorus.",
        ],
    },
    Genre {
        name: "Classical",
        prompts: &[
            "Melancholic solo violin melody in D minor over sustained strings.",
            "Majestic brass fanfare opening a grand orchestral piece.",
            "Delicate solo piano introduction in the style of an early romantic sonata.",
            "Contrapuntal string quartet passage with interlocking lines.",
        ],
    },
    Genre {
        name: "Hip-Hop/Rap",
        prompts: &[
            "Head-nodding boom bap beat with a deep, round bassline at 90 bpm.",
            "Trap drum pattern with rolling hi-hats and a long 808 tail.",
            "Dusty sampled soul loop with vinyl crackle for a freestyle.",
        ],
    },
    Genre {
        name: "Rock",
        prompts: &[
            "Driving distorted guitar riff that opens a stadium rock anthem.",
            "Hard-hitting live drum groove with crashing cymbals on the downbeat.",
            "Slow build into an intense guitar solo over a power-chord progression.",
        ],
    },
    Genre {
        name: "Electronic/EDM",
        prompts: &[
            "Energetic supersaw lead for a festival club track at 128 bpm.",
            "Build-up with rising white noise and snare rolls leading into a heavy drop.",
            "Glitchy, experimental intro with chopped vocal fragments.",
        ],
    },
    Genre {
        name: "Jazz",
        prompts: &[
            "Smooth tenor saxophone solo over a late-night club rhythm section.",
            "Swinging walking bass line with brushed drums and sparse piano comping.",
            "Modal piano riff moving through lush extended chords.",
        ],
    },
    Genre {
        name: "Ambient",
        prompts: &[
            "Slowly evolving ambient pad with soft shimmer and distant field recordings.",
            "Calm drone in C with gentle granular textures, no percussion.",
            "Warm tape-saturated synth swells for a rainy afternoon.",
        ],
    },
    Genre {
        name: "Cinematic",
        prompts: &[
            "Epic orchestral trailer cue with taiko drums and rising strings.",
            "Tense, suspenseful underscore with pulsing low synths and staccato cellos.",
            "Emotional piano and strings theme for a film's closing scene.",
        ],
    },
];

/// Genre names in catalogue order.
pub fn genre_names() -> impl Iterator<Item = &'static str> {
    GENRES.iter().map(|g| g.name)
}

/// Look up a genre by name, ignoring case and surrounding whitespace.
pub fn find_genre(name: &str) -> Option<&'static Genre> {
    let name = name.trim();
    GENRES.iter().find(|g| g.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let genre = find_genre("  hip-hop/rap ").unwrap();
        assert_eq!(genre.name, "Hip-Hop/Rap");
        assert!(find_genre("polka").is_none());
    }

    #[test]
    fn every_genre_has_prompts() {
        assert_eq!(genre_names().count(), 8);
        assert!(GENRES.iter().all(|g| !g.prompts.is_empty()));
    }
}
