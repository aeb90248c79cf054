//! Prints SQL filling a freshly migrated database with users, posts and
//! comment threads. Every user can log in with `password`.

use chrono::{Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use tapestry_api::{Section, Time, Uuid};

const NUM_USERS: usize = 5;
const NUM_POSTS: usize = 40;
const MAX_COMMENTS_PER_POST: usize = 25;

const POST_WORD_COUNT: usize = 40;
const COMMENT_WORD_COUNT: usize = 15;

// percentages
const REPLY_RATE: u32 = 60;
const ORPHAN_RATE: u32 = 5;
const NAMED_USER_RATE: u32 = 70;

const PASSWORD: &str = "password";

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    if n == 0 {
        return;
    }
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn nullable(s: Option<&str>) -> String {
    s.map_or_else(|| String::from("NULL"), quote)
}

fn percent(rng: &mut impl Rng, rate: u32) -> bool {
    rng.gen_ratio(rate, 100)
}

fn main() {
    let mut rng = rand::thread_rng();
    let hash = bcrypt::hash(PASSWORD, 4).expect("hashing password");
    let start: Time = Utc::now() - Duration::days(30);

    // Generate users, along with their profiles
    let users = (0..NUM_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    gen_n_items("users", NUM_USERS, |i| {
        format!("('{}', 'user{}@example.org', '{}')", users[i], i, hash)
    });
    gen_n_items("profiles", NUM_USERS, |i| {
        let name = match percent(&mut rng, NAMED_USER_RATE) {
            true => Some(lipsum::lipsum_words(2)),
            false => None,
        };
        format!(
            "('{}', {}, NULL, 'user{}@example.org')",
            users[i],
            nullable(name.as_deref()),
            i
        )
    });

    // Generate posts
    let mut posts = Vec::new();
    gen_n_items("posts", NUM_POSTS, |_| {
        let id = Uuid::new_v4();
        let date = start + Duration::minutes(rng.gen_range(0..60 * 24 * 25));
        posts.push((id, date));
        let section = *Section::ALL.choose(&mut rng).expect("sections are not empty");
        let category = section.categories().choose(&mut rng);
        format!(
            "('{}', '{}', {}, '{}', {}, {}, {}, {}, {}, {}, {}, NULL)",
            id,
            date.to_rfc3339(),
            quote(&lipsum::lipsum_words(POST_WORD_COUNT)),
            users.choose(&mut rng).expect("there are users"),
            rng.gen_range(0..20),
            quote(section.as_str()),
            quote(section.title()),
            quote(section.emoji()),
            quote(section.title()),
            nullable(category.map(|c| c.name)),
            nullable(category.map(|c| c.emoji)),
        )
    });

    // Generate comment threads, replying to earlier comments of the same post
    let mut comments = Vec::new();
    for (post, date) in &posts {
        let mut thread: Vec<Uuid> = Vec::new();
        let mut date = *date;
        for _ in 0..rng.gen_range(0..=MAX_COMMENTS_PER_POST) {
            let id = Uuid::new_v4();
            date = date + Duration::minutes(rng.gen_range(1..600));
            let parent = if percent(&mut rng, ORPHAN_RATE) {
                // parent that never existed, as left behind by a deletion
                Some(Uuid::new_v4())
            } else if !thread.is_empty() && percent(&mut rng, REPLY_RATE) {
                thread.choose(&mut rng).copied()
            } else {
                None
            };
            thread.push(id);
            comments.push(format!(
                "('{}', '{}', {}, '{}', '{}', {})",
                id,
                date.to_rfc3339(),
                quote(&lipsum::lipsum_words(COMMENT_WORD_COUNT)),
                users.choose(&mut rng).expect("there are users"),
                post,
                parent.map_or_else(|| String::from("NULL"), |p| format!("'{p}'")),
            ));
        }
    }
    gen_n_items("comments", comments.len(), |i| comments[i].clone());
}
