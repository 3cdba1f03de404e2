use clap::{Args, Subcommand};

use petfeeder_core::{
    ActivityLevel, CommandDispatcher, HealthData, PageScope, Pet, PetDraft, StoreHandle,
};

use super::{confirm, connect, mount, CommandResult, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct PetCommand {
    #[command(subcommand)]
    pub command: PetSubcommand,
}

#[derive(Subcommand)]
pub enum PetSubcommand {
    /// List pets
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Add a pet
    Add {
        /// Name of the pet
        name: String,

        /// Weight in kg
        #[arg(long)]
        weight: f64,

        /// Age in years
        #[arg(long, default_value_t = 0)]
        age: u32,

        #[arg(long)]
        breed: Option<String>,

        /// Activity level (low, medium, high)
        #[arg(long, default_value = "medium")]
        activity: ActivityLevel,

        /// Comma separated dietary restrictions
        #[arg(long)]
        restrictions: Option<String>,
    },

    /// Update a pet
    Update {
        /// Pet ID or name
        identifier: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// Weight in kg
        #[arg(long)]
        weight: Option<f64>,

        /// Age in years
        #[arg(long)]
        age: Option<u32>,

        #[arg(long)]
        breed: Option<String>,

        /// Activity level (low, medium, high)
        #[arg(long)]
        activity: Option<ActivityLevel>,

        /// Comma separated dietary restrictions (replaces the list)
        #[arg(long)]
        restrictions: Option<String>,
    },

    /// Delete a pet
    Delete {
        /// Pet ID or name
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

/// Find a pet by ID, then by case-insensitive name.
fn find_pet(pets: &StoreHandle<Pet>, identifier: &str) -> Option<Pet> {
    pets.get(identifier).or_else(|| {
        pets.select(|p| p.name.eq_ignore_ascii_case(identifier.trim()))
            .into_iter()
            .next()
    })
}

impl PetCommand {
    pub async fn run(&self, config: &Config) -> CommandResult {
        let backend = connect(config).await?;
        let page = mount::<Pet>(&backend, PageScope::User).await?;
        let pets = page.store();
        let dispatcher = CommandDispatcher::new(backend.clone());

        match &self.command {
            PetSubcommand::List { format } => {
                let all = pets.snapshot();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&all)?);
                    }
                    OutputFormat::Text => {
                        if all.is_empty() {
                            println!("No pets yet.");
                        }
                        for pet in &all {
                            println!("{}  {}", pet.pet_id, pet);
                        }
                    }
                }
                Ok(())
            }

            PetSubcommand::Add {
                name,
                weight,
                age,
                breed,
                activity,
                restrictions,
            } => {
                let draft = PetDraft {
                    pet_id: None,
                    name: name.clone(),
                    health_data: HealthData {
                        weight: *weight,
                        age: *age,
                        breed: breed.clone(),
                        activity_level: *activity,
                        dietary_restrictions: restrictions
                            .as_deref()
                            .map(HealthData::parse_restrictions)
                            .unwrap_or_default(),
                    },
                };
                let pet_id = dispatcher.save_pet(pets, draft).await?;
                println!("Added pet {} ({})", name.trim(), pet_id);
                Ok(())
            }

            PetSubcommand::Update {
                identifier,
                name,
                weight,
                age,
                breed,
                activity,
                restrictions,
            } => {
                let pet = find_pet(pets, identifier)
                    .ok_or_else(|| format!("Pet not found: {}", identifier))?;

                let mut health = pet.health_data.clone();
                if let Some(weight) = weight {
                    health.weight = *weight;
                }
                if let Some(age) = age {
                    health.age = *age;
                }
                if breed.is_some() {
                    health.breed = breed.clone();
                }
                if let Some(activity) = activity {
                    health.activity_level = *activity;
                }
                if let Some(restrictions) = restrictions {
                    health.dietary_restrictions = HealthData::parse_restrictions(restrictions);
                }

                let draft = PetDraft {
                    pet_id: Some(pet.pet_id.clone()),
                    name: name.clone().unwrap_or_else(|| pet.name.clone()),
                    health_data: health,
                };
                dispatcher.save_pet(pets, draft).await?;
                println!("Updated pet: {}", pet.pet_id);
                Ok(())
            }

            PetSubcommand::Delete { identifier, force } => {
                let pet = find_pet(pets, identifier)
                    .ok_or_else(|| format!("Pet not found: {}", identifier))?;

                if !force && !confirm(&format!("Delete pet '{}'?", pet.name))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                dispatcher.delete_pet(pets, &pet.pet_id).await?;
                println!("Deleted pet: {}", pet.name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pet(id: &str, name: &str) -> Pet {
        Pet {
            pet_id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            health_data: HealthData::default(),
            created_at: None,
        }
    }

    #[test]
    fn test_find_pet_by_id_or_name() {
        let pets = StoreHandle::default();
        pets.seed(vec![pet("p1", "Biscuit"), pet("p2", "Mochi")]);

        assert_eq!(find_pet(&pets, "p2").unwrap().name, "Mochi");
        assert_eq!(find_pet(&pets, "biscuit").unwrap().pet_id, "p1");
        assert!(find_pet(&pets, "Rex").is_none());
    }
}
