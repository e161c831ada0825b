use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use whey_core::TrackerService;
use whey_core::models::{NewUser, User};

use super::helpers::{parse_grams, print_json};
use crate::auth::{generate_token, hash_token};

pub(crate) fn cmd_user_add(
    svc: &TrackerService,
    name: &str,
    email: Option<String>,
    weight: Option<&str>,
    json: bool,
) -> Result<()> {
    let weight_kg = weight.map(parse_weight).transpose()?;
    let user = svc.register_user(&NewUser {
        username: name.to_string(),
        email,
        weight_kg,
    })?;

    if json {
        print_json(&user)?;
    } else {
        let username = &user.username;
        println!("Created user '{username}' (ID: {})", user.id);
        if user.weight_kg.is_none() {
            eprintln!("Set a weight with `whey --user {username} user weight <kg>`");
            eprintln!("before setting targets.");
        }
    }
    Ok(())
}

pub(crate) fn cmd_user_list(svc: &TrackerService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Username")]
        username: String,
        #[tabled(rename = "Weight")]
        weight: String,
    }

    let users = svc.list_users()?;
    if json {
        return print_json(&users);
    }
    if users.is_empty() {
        eprintln!("No users yet. Use `whey user add <name>` to create one.");
        return Ok(());
    }

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            username: u.username.clone(),
            weight: u
                .weight_kg
                .map_or_else(|| "-".to_string(), |w| format!("{w} kg")),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_user_show(user: &User, json: bool) -> Result<()> {
    if json {
        return print_json(user);
    }
    println!("{} (ID: {})", user.username, user.id);
    match user.weight_kg {
        Some(w) => println!("  Weight: {w} kg"),
        None => println!("  Weight: not set"),
    }
    if let Some(email) = &user.email {
        println!("  Email:  {email}");
    }
    println!("  Since:  {}", user.created_at);
    Ok(())
}

pub(crate) fn cmd_user_weight(
    svc: &TrackerService,
    user: &User,
    kg: &str,
    json: bool,
) -> Result<()> {
    let weight_kg = parse_weight(kg)?;
    let user = svc.set_weight(user, weight_kg)?;

    if json {
        print_json(&user)?;
    } else {
        let weight = user
            .weight_kg
            .map_or_else(|| "-".to_string(), |w| format!("{w} kg"));
        println!("Weight for '{}' set to {weight}", user.username);
        println!("Existing targets keep their value; run `whey target set` to recompute.");
    }
    Ok(())
}

pub(crate) fn cmd_user_email(
    svc: &TrackerService,
    user: &User,
    email: &str,
    json: bool,
) -> Result<()> {
    let user = svc.set_email(user, email)?;

    if json {
        print_json(&user)?;
    } else {
        println!(
            "Email for '{}' set to {}",
            user.username,
            user.email.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

/// Issue a fresh API token, replacing any previous one.
pub(crate) fn cmd_user_token(svc: &TrackerService, user: &User, json: bool) -> Result<()> {
    let token = generate_token();
    svc.set_token_hash(user, &hash_token(&token))?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "username": user.username, "token": token })
        );
    } else {
        println!("{token}");
        eprintln!(
            "Token for '{}'. It is shown only once; any previous token no longer works.",
            user.username
        );
    }
    Ok(())
}

fn parse_weight(s: &str) -> Result<rust_decimal::Decimal> {
    parse_grams("weight_kg", s.trim().trim_end_matches("kg"))
}
